//! Decoding of submitted images.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::DynamicImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageDecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unreadable image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode a base64 image, with or without a `data:<mime>;base64,` prefix.
pub fn decode_base64_image(payload: &str) -> Result<DynamicImage, ImageDecodeError> {
    let encoded = strip_data_url(payload.trim());
    if encoded.is_empty() {
        return Err(ImageDecodeError::Empty);
    }
    let bytes = STANDARD.decode(encoded)?;
    Ok(image::load_from_memory(&bytes)?)
}

/// Decode every payload, failing on the first malformed one.
pub fn decode_base64_images(payloads: &[String]) -> Result<Vec<DynamicImage>, ImageDecodeError> {
    payloads.iter().map(|p| decode_base64_image(p)).collect()
}

pub fn load_image_file(path: &Path) -> Result<DynamicImage, ImageDecodeError> {
    Ok(image::open(path)?)
}

fn strip_data_url(payload: &str) -> &str {
    if payload.starts_with("data:") {
        payload.split_once(',').map(|(_, data)| data).unwrap_or("")
    } else {
        payload
    }
}
