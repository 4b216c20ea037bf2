use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side length of the canonical square face crop.
pub const FACE_SIZE: u32 = 100;
/// Color channels kept in a face vector (RGB).
pub const FACE_CHANNELS: usize = 3;
/// Length of every stored face vector.
pub const FACE_VECTOR_LEN: usize = (FACE_SIZE * FACE_SIZE) as usize * FACE_CHANNELS;

/// Axis-aligned bounding box of a detected face, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Clip a raw detector box to an image of `image_width` × `image_height`.
    ///
    /// Returns `None` when nothing of the box lies inside the image.
    pub fn clamped(x: i32, y: i32, width: u32, height: u32, image_width: u32, image_height: u32) -> Option<Self> {
        let x0 = i64::from(x).clamp(0, i64::from(image_width));
        let y0 = i64::from(y).clamp(0, i64::from(image_height));
        let x1 = (i64::from(x) + i64::from(width)).clamp(0, i64::from(image_width));
        let y1 = (i64::from(y) + i64::from(height)).clamp(0, i64::from(image_height));

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// One face sample: the canonical crop flattened row-major, channel-interleaved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceVector {
    pub values: Vec<u8>,
}

impl FaceVector {
    pub fn new(values: Vec<u8>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.values
    }

    /// Euclidean distance to another vector of the same length.
    pub fn distance(&self, other: &FaceVector) -> Result<f64, crate::knn::ClassifierError> {
        crate::knn::distance(&self.values, &other.values)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {kind}: {value:?}")]
pub struct InvalidIdentifier {
    pub kind: &'static str,
    pub value: String,
}

/// Reject identifiers that would escape the storage root or collide with
/// temporary files. Identifiers become path components verbatim.
pub fn validate_identifier(kind: &'static str, value: &str) -> Result<(), InvalidIdentifier> {
    let bad = value.is_empty()
        || value.starts_with('.')
        || value.contains(['/', '\\', '\0']);
    if bad {
        return Err(InvalidIdentifier {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Identity of an enrolled student within a class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudentId {
    pub enrollment: String,
    pub name: String,
}

impl StudentId {
    pub fn new(enrollment: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            enrollment: enrollment.into(),
            name: name.into(),
        }
    }

    /// Check both parts. The enrollment id may not contain `_`, which
    /// separates it from the display name in artifact names.
    pub fn validate(&self) -> Result<(), InvalidIdentifier> {
        validate_identifier("enrollment id", &self.enrollment)?;
        if self.enrollment.contains('_') {
            return Err(InvalidIdentifier {
                kind: "enrollment id",
                value: self.enrollment.clone(),
            });
        }
        validate_identifier("display name", &self.name)
    }

    /// File stem of this student's gallery artifact: `{enrollment}_{name}`.
    pub fn artifact_stem(&self) -> String {
        format!("{}_{}", self.enrollment, self.name)
    }

    /// Parse an artifact stem, splitting at the first `_`.
    pub fn from_artifact_stem(stem: &str) -> Option<Self> {
        let (enrollment, name) = stem.split_once('_')?;
        if enrollment.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(enrollment, name))
    }
}

impl std::fmt::Display for StudentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.enrollment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_vector_len() {
        assert_eq!(FACE_VECTOR_LEN, 30_000);
    }

    #[test]
    fn test_face_vector_distance_requires_equal_length() {
        let a = FaceVector::new(vec![0, 0]);
        assert_eq!(a.distance(&FaceVector::new(vec![3, 4])).unwrap(), 5.0);
        assert!(a.distance(&FaceVector::new(vec![0, 0, 250])).is_err());
    }

    #[test]
    fn test_clamped_inside() {
        let b = BoundingBox::clamped(10, 20, 30, 40, 100, 100).unwrap();
        assert_eq!(b, BoundingBox { x: 10, y: 20, width: 30, height: 40 });
        assert_eq!(b.area(), 1200);
    }

    #[test]
    fn test_clamped_negative_origin() {
        let b = BoundingBox::clamped(-5, -5, 20, 20, 100, 100).unwrap();
        assert_eq!(b, BoundingBox { x: 0, y: 0, width: 15, height: 15 });
    }

    #[test]
    fn test_clamped_overflowing_edge() {
        let b = BoundingBox::clamped(90, 90, 20, 20, 100, 100).unwrap();
        assert_eq!(b, BoundingBox { x: 90, y: 90, width: 10, height: 10 });
    }

    #[test]
    fn test_clamped_outside() {
        assert!(BoundingBox::clamped(200, 0, 20, 20, 100, 100).is_none());
        assert!(BoundingBox::clamped(-30, 0, 20, 20, 100, 100).is_none());
    }

    #[test]
    fn test_artifact_stem_roundtrip_keeps_underscores_in_name() {
        let id = StudentId::new("007", "Ada_Lovelace");
        assert_eq!(id.artifact_stem(), "007_Ada_Lovelace");
        let parsed = StudentId::from_artifact_stem(&id.artifact_stem()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_from_artifact_stem_rejects_missing_parts() {
        assert!(StudentId::from_artifact_stem("007").is_none());
        assert!(StudentId::from_artifact_stem("_Ada").is_none());
        assert!(StudentId::from_artifact_stem("007_").is_none());
    }

    #[test]
    fn test_validate_rejects_path_tricks() {
        assert!(validate_identifier("class name", "CS101").is_ok());
        assert!(validate_identifier("class name", "").is_err());
        assert!(validate_identifier("class name", "..").is_err());
        assert!(validate_identifier("class name", "a/b").is_err());
        assert!(validate_identifier("class name", "a\\b").is_err());
    }

    #[test]
    fn test_student_validate() {
        assert!(StudentId::new("007", "Ada").validate().is_ok());
        assert!(StudentId::new("0_7", "Ada").validate().is_err());
        assert!(StudentId::new("007", "").validate().is_err());
        assert!(StudentId::new("007", "../Ada").validate().is_err());
    }
}
