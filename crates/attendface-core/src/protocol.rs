//! JSON request and response bodies, and the request-level handlers that
//! turn pipeline and ledger outcomes into them.
//!
//! Every error is reported as a `fail` response with a human-readable
//! message; none escapes to the caller.

use crate::attendance::{AttendanceRecord, Mark, COLUMNS};
use crate::detector::FaceLocator;
use crate::gallery::GalleryError;
use crate::image_io::{decode_base64_image, decode_base64_images};
use crate::pipeline::{Enrollment, FacePipeline, Identification, PipelineError};
use crate::types::StudentId;
use serde::{Deserialize, Serialize};

pub const MSG_NO_FACES: &str = "No faces detected";
pub const MSG_NOT_RECOGNIZED: &str = "Face not recognized";
pub const MSG_NO_CLASS_DATA: &str = "No data for this class";
pub const MSG_NO_TRAINED_DATA: &str = "No trained data found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Fail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterFaceRequest {
    pub class_name: String,
    pub name: String,
    pub enrollment: String,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterFaceResponse {
    pub status: Status,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub count: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentifyFaceRequest {
    pub class_name: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyFaceResponse {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub enrollment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

impl IdentifyFaceResponse {
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: Status::Fail,
            name: None,
            enrollment: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckinRequest {
    pub class_name: String,
    pub enrollment: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub class_name: String,
    pub enrollment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkResponse {
    pub status: Status,
    pub message: String,
}

impl MarkResponse {
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: Status::Fail,
            message: message.into(),
        }
    }
}

impl From<Mark> for MarkResponse {
    fn from(mark: Mark) -> Self {
        Self {
            status: if mark.is_ok() { Status::Success } else { Status::Fail },
            message: mark.message().to_string(),
        }
    }
}

/// A class ledger as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceTable {
    pub success: bool,
    pub columns: Vec<&'static str>,
    pub count: usize,
    pub data: Vec<AttendanceRecord>,
}

impl From<Vec<AttendanceRecord>> for AttendanceTable {
    fn from(data: Vec<AttendanceRecord>) -> Self {
        Self {
            success: true,
            columns: COLUMNS.to_vec(),
            count: data.len(),
            data,
        }
    }
}

impl From<Result<Enrollment, PipelineError>> for RegisterFaceResponse {
    fn from(result: Result<Enrollment, PipelineError>) -> Self {
        match result {
            Ok(enrollment) => Self {
                status: Status::Success,
                message: format!("{} faces saved", enrollment.vectors),
                count: Some(enrollment.vectors),
            },
            Err(e) => Self {
                status: Status::Fail,
                message: match e {
                    PipelineError::NoFaceDetected => MSG_NO_FACES.to_string(),
                    PipelineError::Decode(e) => format!("Invalid image: {e}"),
                    other => other.to_string(),
                },
                count: None,
            },
        }
    }
}

impl From<Result<Identification, PipelineError>> for IdentifyFaceResponse {
    fn from(result: Result<Identification, PipelineError>) -> Self {
        match result {
            Ok(found) => Self {
                status: Status::Success,
                name: Some(found.student.name),
                enrollment: Some(found.student.enrollment),
                message: None,
            },
            Err(PipelineError::NoFaceDetected | PipelineError::Unrecognized) => Self::fail(MSG_NOT_RECOGNIZED),
            Err(PipelineError::Gallery(GalleryError::NoClassData(_))) => Self::fail(MSG_NO_CLASS_DATA),
            Err(PipelineError::Gallery(GalleryError::NoTrainedSamples(_))) => Self::fail(MSG_NO_TRAINED_DATA),
            Err(PipelineError::Decode(e)) => Self::fail(format!("Invalid image: {e}")),
            Err(other) => Self::fail(other.to_string()),
        }
    }
}

/// Decode the request images and enroll the student.
pub fn register_face<L: FaceLocator>(pipeline: &mut FacePipeline<L>, req: RegisterFaceRequest) -> RegisterFaceResponse {
    let student = StudentId::new(req.enrollment, req.name);
    let result = decode_base64_images(&req.images)
        .map_err(PipelineError::from)
        .and_then(|images| pipeline.enroll(&req.class_name, &student, &images));

    match &result {
        Ok(enrollment) => tracing::info!(
            class = %req.class_name,
            enrollment = %student.enrollment,
            faces = enrollment.faces,
            vectors = enrollment.vectors,
            "face registered"
        ),
        Err(e) => {
            tracing::warn!(class = %req.class_name, enrollment = %student.enrollment, error = %e, "register_face failed")
        }
    }
    result.into()
}

/// Decode the probe image and identify it within the class.
pub fn identify_face<L: FaceLocator>(pipeline: &mut FacePipeline<L>, req: IdentifyFaceRequest) -> IdentifyFaceResponse {
    let result = decode_base64_image(&req.image)
        .map_err(PipelineError::from)
        .and_then(|image| pipeline.identify(&req.class_name, &image));

    if let Err(e) = &result {
        tracing::warn!(class = %req.class_name, error = %e, "identify_face failed");
    }
    result.into()
}
