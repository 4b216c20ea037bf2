//! Frontal face detection with a pretrained cascade model.
//!
//! Wraps the SeetaFace funnel-structured cascade evaluated by `rustface`.
//! The model is loaded once and the detection parameters are fixed; callers
//! see only bounding boxes, never scores.

use crate::types::BoundingBox;
use image::GrayImage;
use rustface::{Detector, ImageData};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

const MIN_FACE_SIZE: u32 = 20;
const SCORE_THRESHOLD: f64 = 2.0;
const PYRAMID_SCALE_FACTOR: f32 = 0.8;
const SLIDE_WINDOW_STEP: u32 = 4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("cascade model not found: {0}")]
    ModelNotFound(String),
    #[error("failed to load cascade model {path}: {source}")]
    ModelLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Anything that can find faces in a grayscale image.
///
/// Implementations return boxes in priority order; callers use the first.
pub trait FaceLocator {
    fn locate(&mut self, gray: &GrayImage) -> Vec<BoundingBox>;
}

/// Cascade-based frontal face detector.
pub struct FaceDetector {
    inner: Box<dyn Detector>,
}

impl FaceDetector {
    /// Load the cascade model from `model_path`.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        let path = model_path.display().to_string();
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(path));
        }

        let file = File::open(model_path).map_err(|source| DetectorError::ModelLoad {
            path: path.clone(),
            source,
        })?;
        let model = rustface::read_model(BufReader::new(file)).map_err(|source| DetectorError::ModelLoad {
            path: path.clone(),
            source,
        })?;

        let mut inner = rustface::create_detector_with_model(model);
        inner.set_min_face_size(MIN_FACE_SIZE);
        inner.set_score_thresh(SCORE_THRESHOLD);
        inner.set_pyramid_scale_factor(PYRAMID_SCALE_FACTOR);
        inner.set_slide_window_step(SLIDE_WINDOW_STEP, SLIDE_WINDOW_STEP);

        tracing::info!(
            path = %path,
            min_face_size = MIN_FACE_SIZE,
            score_threshold = SCORE_THRESHOLD,
            scale_factor = PYRAMID_SCALE_FACTOR,
            "loaded face cascade model"
        );

        Ok(Self { inner })
    }
}

impl FaceLocator for FaceDetector {
    /// Detect faces, largest first. Boxes are clipped to the image.
    fn locate(&mut self, gray: &GrayImage) -> Vec<BoundingBox> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let mut image = ImageData::new(gray.as_raw(), width, height);
        let faces = self.inner.detect(&mut image);

        let boxes: Vec<BoundingBox> = faces
            .iter()
            .filter_map(|face| {
                let b = face.bbox();
                BoundingBox::clamped(b.x(), b.y(), b.width(), b.height(), width, height)
            })
            .collect();

        tracing::debug!(raw = faces.len(), kept = boxes.len(), "cascade detection");
        largest_first(boxes)
    }
}

/// Order boxes by area, largest first; equal areas keep detector order.
fn largest_first(mut boxes: Vec<BoundingBox>) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.area().cmp(&a.area()));
    boxes
}
