//! attendface-core: face enrollment, identification and attendance.
//!
//! A cascade detector finds faces, crops are normalized to raw 100×100 RGB
//! vectors, stored per class as `.npy` galleries and classified with a
//! k-nearest-neighbor vote. Attendance is kept in per-class CSV ledgers.

pub mod attendance;
pub mod detector;
pub mod gallery;
pub mod image_io;
pub mod knn;
pub mod normalizer;
pub mod npy;
pub mod pipeline;
pub mod protocol;
pub mod types;

pub use attendance::{AttendanceBook, AttendanceRecord, Mark};
pub use detector::{FaceDetector, FaceLocator};
pub use gallery::{ClassGallery, GalleryStore, StudentSummary};
pub use knn::KnnClassifier;
pub use pipeline::{FacePipeline, PipelineError, PipelineOptions};
pub use types::{BoundingBox, FaceVector, StudentId};
