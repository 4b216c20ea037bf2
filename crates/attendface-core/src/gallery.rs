//! Per-class gallery storage.
//!
//! Layout: `<root>/<class>/<enrollment>_<name>.npy`, one `(n, FACE_VECTOR_LEN)`
//! `u8` matrix per student. Writes go through a hidden temporary file and a
//! rename, so a reader sees either the old artifact or the new one.

use crate::npy::{self, NpyError};
use crate::types::{validate_identifier, FaceVector, InvalidIdentifier, StudentId, FACE_VECTOR_LEN};
use ndarray::{Array2, ArrayView2, Axis};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ARTIFACT_EXTENSION: &str = "npy";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("no data for class {0}")]
    NoClassData(String),
    #[error("no trained samples for class {0}")]
    NoTrainedSamples(String),
    #[error("no face vectors to store")]
    EmptyEnrollment,
    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidIdentifier),
    #[error("face vector has {actual} values, expected {expected}")]
    VectorLength { expected: usize, actual: usize },
    #[error("artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: NpyError,
    },
    #[error("shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// All stored vectors of one class, labeled by student.
///
/// Labels index `students` and are only meaningful for this value.
#[derive(Debug, Clone)]
pub struct ClassGallery {
    pub samples: Array2<u8>,
    pub labels: Vec<usize>,
    pub students: Vec<StudentId>,
}

impl ClassGallery {
    pub fn student(&self, label: usize) -> Option<&StudentId> {
        self.students.get(label)
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// One enrolled student as seen on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentSummary {
    pub enrollment: String,
    pub name: String,
    pub vectors: usize,
}

/// Filesystem-backed gallery store rooted at the dataset directory.
#[derive(Debug, Clone)]
pub struct GalleryStore {
    root: PathBuf,
}

impl GalleryStore {
    /// Open the store, creating `root` if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of `class`; not created.
    pub fn class_dir(&self, class: &str) -> Result<PathBuf, GalleryError> {
        validate_identifier("class name", class)?;
        Ok(self.root.join(class))
    }

    pub fn artifact_path(&self, class: &str, student: &StudentId) -> Result<PathBuf, GalleryError> {
        student.validate()?;
        Ok(self
            .class_dir(class)?
            .join(format!("{}.{ARTIFACT_EXTENSION}", student.artifact_stem())))
    }

    /// Replace `student`'s artifact in `class` with `vectors`.
    ///
    /// Returns the number of vectors written.
    pub fn save_student(&self, class: &str, student: &StudentId, vectors: &[FaceVector]) -> Result<usize, GalleryError> {
        let path = self.artifact_path(class, student)?;
        if vectors.is_empty() {
            return Err(GalleryError::EmptyEnrollment);
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != FACE_VECTOR_LEN) {
            return Err(GalleryError::VectorLength {
                expected: FACE_VECTOR_LEN,
                actual: bad.len(),
            });
        }

        let mut data = Vec::with_capacity(vectors.len() * FACE_VECTOR_LEN);
        for v in vectors {
            data.extend_from_slice(v.as_slice());
        }
        let matrix = Array2::from_shape_vec((vectors.len(), FACE_VECTOR_LEN), data)?;

        let dir = self.class_dir(class)?;
        fs::create_dir_all(&dir)?;
        let tmp = dir.join(format!(".{}.{ARTIFACT_EXTENSION}.tmp", student.artifact_stem()));
        let written = write_artifact(&tmp, matrix.view())
            .and_then(|()| fs::rename(&tmp, &path).map_err(GalleryError::from));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        tracing::info!(
            class,
            enrollment = %student.enrollment,
            name = %student.name,
            vectors = vectors.len(),
            "stored student gallery"
        );
        Ok(vectors.len())
    }

    /// Load every usable artifact of `class` into one labeled matrix.
    ///
    /// Artifacts are visited in file-name order, so label numbering is
    /// stable for an unchanged directory.
    pub fn load_class(&self, class: &str) -> Result<ClassGallery, GalleryError> {
        let dir = self.class_dir(class)?;
        if !dir.is_dir() {
            return Err(GalleryError::NoClassData(class.to_string()));
        }

        let mut blocks: Vec<Array2<u8>> = Vec::new();
        let mut labels = Vec::new();
        let mut students = Vec::new();

        for (path, student) in artifacts(&dir)? {
            let matrix = match read_artifact(&path) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable artifact");
                    continue;
                }
            };
            if matrix.nrows() == 0 || matrix.ncols() != FACE_VECTOR_LEN {
                tracing::warn!(
                    path = %path.display(),
                    shape = ?matrix.dim(),
                    "skipping artifact with unexpected shape"
                );
                continue;
            }

            let label = students.len();
            labels.extend(std::iter::repeat(label).take(matrix.nrows()));
            students.push(student);
            blocks.push(matrix);
        }

        if blocks.is_empty() {
            return Err(GalleryError::NoTrainedSamples(class.to_string()));
        }

        let views: Vec<ArrayView2<u8>> = blocks.iter().map(|b| b.view()).collect();
        let samples = ndarray::concatenate(Axis(0), &views)?;

        tracing::debug!(
            class,
            students = students.len(),
            vectors = labels.len(),
            "loaded class gallery"
        );
        Ok(ClassGallery {
            samples,
            labels,
            students,
        })
    }

    /// Enrolled students of `class` with their vector counts.
    pub fn list_students(&self, class: &str) -> Result<Vec<StudentSummary>, GalleryError> {
        let dir = self.class_dir(class)?;
        if !dir.is_dir() {
            return Err(GalleryError::NoClassData(class.to_string()));
        }

        let mut summaries = Vec::new();
        for (path, student) in artifacts(&dir)? {
            let header = File::open(&path)
                .map_err(NpyError::from)
                .and_then(|f| npy::read_header(&mut BufReader::new(f)));
            match header {
                Ok(h) => summaries.push(StudentSummary {
                    enrollment: student.enrollment,
                    name: student.name,
                    vectors: h.rows,
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable artifact");
                }
            }
        }
        Ok(summaries)
    }
}

/// Artifact files in `dir` with their parsed identities, sorted by file name.
fn artifacts(dir: &Path) -> Result<Vec<(PathBuf, StudentId)>, GalleryError> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXTENSION) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.starts_with('.') {
            continue;
        }
        match StudentId::from_artifact_stem(stem) {
            Some(student) => found.push((path.clone(), student)),
            None => tracing::warn!(path = %path.display(), "artifact name is not <enrollment>_<name>"),
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

fn write_artifact(path: &Path, matrix: ArrayView2<u8>) -> Result<(), GalleryError> {
    let file = File::create(path)?;
    npy::write_u8_matrix(BufWriter::new(file), matrix).map_err(|source| GalleryError::Artifact {
        path: path.to_path_buf(),
        source,
    })
}

fn read_artifact(path: &Path) -> Result<Array2<u8>, NpyError> {
    let file = File::open(path)?;
    npy::read_u8_matrix(BufReader::new(file))
}
