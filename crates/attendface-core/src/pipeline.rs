//! Enrollment and identification flows.
//!
//! Enrollment: images → detect → normalize (+ mirror) → store.
//! Identification: image → detect → normalize → load class → kNN vote.
//! Every failure is terminal for the request; nothing is retried.

use crate::detector::FaceLocator;
use crate::gallery::{GalleryError, GalleryStore};
use crate::image_io::ImageDecodeError;
use crate::knn::{ClassifierError, KnnClassifier, DEFAULT_NEIGHBORS};
use crate::normalizer::{equalize_histogram, face_samples, face_vector};
use crate::types::{BoundingBox, StudentId};
use image::{DynamicImage, GrayImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face not recognized")]
    Unrecognized,
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Decode(#[from] ImageDecodeError),
}

/// Tunables fixed for the life of a pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Neighbors consulted per identification vote.
    pub neighbors: usize,
    /// Equalize the probe's detector input as enrollment does.
    pub equalize_probe: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            neighbors: DEFAULT_NEIGHBORS,
            equalize_probe: true,
        }
    }
}

/// Result of a successful enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub student: StudentId,
    pub images: usize,
    /// Images in which a face was found.
    pub faces: usize,
    /// Vectors written: two per face.
    pub vectors: usize,
}

/// Result of a successful identification.
#[derive(Debug, Clone, PartialEq)]
pub struct Identification {
    pub student: StudentId,
    pub votes: usize,
    pub neighbors: usize,
    pub distance: f64,
}

pub struct FacePipeline<L> {
    locator: L,
    store: GalleryStore,
    classifier: KnnClassifier,
    equalize_probe: bool,
}

impl<L: FaceLocator> FacePipeline<L> {
    pub fn new(locator: L, store: GalleryStore, options: PipelineOptions) -> Self {
        Self {
            locator,
            store,
            classifier: KnnClassifier::new(options.neighbors),
            equalize_probe: options.equalize_probe,
        }
    }

    pub fn store(&self) -> &GalleryStore {
        &self.store
    }

    /// First face of `image`, looked up on its (optionally equalized) grayscale.
    fn first_face(&mut self, image: &DynamicImage, equalize: bool) -> Option<BoundingBox> {
        let mut gray: GrayImage = image.to_luma8();
        if equalize {
            equalize_histogram(&mut gray);
        }
        self.locator.locate(&gray).into_iter().next()
    }

    /// Enroll `student` in `class` from `images`, replacing any earlier
    /// enrollment of the same student.
    pub fn enroll(
        &mut self,
        class: &str,
        student: &StudentId,
        images: &[DynamicImage],
    ) -> Result<Enrollment, PipelineError> {
        // Fail on bad identifiers before spending time on detection.
        self.store.artifact_path(class, student)?;

        let mut vectors = Vec::with_capacity(images.len() * 2);
        let mut faces = 0usize;

        for (index, image) in images.iter().enumerate() {
            let Some(face) = self.first_face(image, true) else {
                tracing::debug!(class, index, "enroll: no face in image");
                continue;
            };
            let Some(samples) = face_samples(&image.to_rgb8(), &face) else {
                continue;
            };
            faces += 1;
            vectors.push(samples.original);
            vectors.push(samples.mirrored);
        }

        if vectors.is_empty() {
            tracing::info!(class, enrollment = %student.enrollment, images = images.len(), "enroll: no faces detected");
            return Err(PipelineError::NoFaceDetected);
        }

        let stored = self.store.save_student(class, student, &vectors)?;
        Ok(Enrollment {
            student: student.clone(),
            images: images.len(),
            faces,
            vectors: stored,
        })
    }

    /// Identify the first face of `image` among the students of `class`.
    pub fn identify(&mut self, class: &str, image: &DynamicImage) -> Result<Identification, PipelineError> {
        let face = self
            .first_face(image, self.equalize_probe)
            .ok_or(PipelineError::NoFaceDetected)?;
        let probe = face_vector(&image.to_rgb8(), &face).ok_or(PipelineError::NoFaceDetected)?;

        let gallery = self.store.load_class(class)?;
        let prediction = self
            .classifier
            .classify(gallery.samples.view(), &gallery.labels, probe.as_slice())?;
        let student = gallery
            .student(prediction.label)
            .cloned()
            .ok_or(PipelineError::Unrecognized)?;

        tracing::info!(
            class,
            enrollment = %student.enrollment,
            votes = prediction.votes,
            neighbors = prediction.neighbors,
            distance = prediction.distance,
            "identified face"
        );

        Ok(Identification {
            student,
            votes: prediction.votes,
            neighbors: prediction.neighbors,
            distance: prediction.distance,
        })
    }
}
