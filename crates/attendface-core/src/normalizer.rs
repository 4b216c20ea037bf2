//! Face crop normalization: crop, resize to the canonical square, flatten.

use crate::types::{BoundingBox, FaceVector, FACE_SIZE};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

/// Original and mirrored sample of one detected face.
#[derive(Debug, Clone)]
pub struct FaceSamples {
    pub original: FaceVector,
    pub mirrored: FaceVector,
}

/// Crop `face` out of `image` and resize it to `FACE_SIZE`².
///
/// Returns `None` if the box does not overlap the image.
fn canonical_crop(image: &RgbImage, face: &BoundingBox) -> Option<RgbImage> {
    let clipped = BoundingBox::clamped(
        i32::try_from(face.x).ok()?,
        i32::try_from(face.y).ok()?,
        face.width,
        face.height,
        image.width(),
        image.height(),
    )?;
    let crop = imageops::crop_imm(image, clipped.x, clipped.y, clipped.width, clipped.height).to_image();
    Some(imageops::resize(&crop, FACE_SIZE, FACE_SIZE, FilterType::Triangle))
}

/// Probe vector: canonical crop only.
pub fn face_vector(image: &RgbImage, face: &BoundingBox) -> Option<FaceVector> {
    canonical_crop(image, face).map(|crop| FaceVector::new(crop.into_raw()))
}

/// Enrollment samples: canonical crop plus its horizontal mirror.
pub fn face_samples(image: &RgbImage, face: &BoundingBox) -> Option<FaceSamples> {
    let crop = canonical_crop(image, face)?;
    let mirrored = imageops::flip_horizontal(&crop);
    Some(FaceSamples {
        original: FaceVector::new(crop.into_raw()),
        mirrored: FaceVector::new(mirrored.into_raw()),
    })
}

/// Global histogram equalization in-place.
///
/// Maps each level through the normalized cumulative histogram so the
/// output spreads over 0–255. Images with a single gray level are left
/// unchanged.
pub fn equalize_histogram(gray: &mut GrayImage) {
    let total = gray.as_raw().len();
    if total == 0 {
        return;
    }

    let mut hist = [0usize; 256];
    for &p in gray.as_raw() {
        hist[p as usize] += 1;
    }

    let mut cdf = [0usize; 256];
    let mut running = 0usize;
    for (level, &count) in hist.iter().enumerate() {
        running += count;
        cdf[level] = running;
    }

    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
    let denom = total - cdf_min;
    if denom == 0 {
        return;
    }

    let mut lut = [0u8; 256];
    for (level, slot) in lut.iter_mut().enumerate() {
        let scaled = (cdf[level].saturating_sub(cdf_min) as f64) * 255.0 / denom as f64;
        *slot = scaled.round().clamp(0.0, 255.0) as u8;
    }

    for p in gray.iter_mut() {
        *p = lut[*p as usize];
    }
}
