use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, ImageReader, RgbImage};
use std::{
    io::Cursor,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageCodecError {
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Failed to decode image: {0}")]
    Decode(image::ImageError),
    #[error("Failed to guess image format: {0}")]
    Format(std::io::Error),
    #[error("Failed to save image to {path:?}: {source}")]
    Save {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Drops a `data:<mime>;base64,` header. Without a comma the payload is returned as is.
pub fn strip_data_uri(payload: &str) -> &str {
    if payload.contains(',') {
        payload.split(',').nth(1).unwrap_or_default()
    } else {
        payload
    }
}

/// Decodes a base64 (optionally data-URI prefixed) payload into an RGB image.
/// ASCII whitespace is ignored, so line-wrapped payloads are accepted.
pub fn decode_base64_image(payload: &str) -> Result<RgbImage, ImageCodecError> {
    let encoded: String = strip_data_uri(payload)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD.decode(encoded)?;

    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(ImageCodecError::Format)?
        .decode()
        .map_err(ImageCodecError::Decode)?;

    Ok(image.to_rgb8())
}

/// Writes uploads as `image_<unix seconds>.jpg`. Same-second uploads overwrite each other.
#[derive(Debug, Clone)]
pub struct UploadStore {
    upload_dir: PathBuf,
}

impl UploadStore {
    pub fn new(upload_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let upload_dir = upload_dir.into();
        std::fs::create_dir_all(&upload_dir)?;
        Ok(Self { upload_dir })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn path_for(&self, timestamp: u64) -> PathBuf {
        self.upload_dir.join(format!("image_{}.jpg", timestamp))
    }

    pub fn save(&self, image: &RgbImage) -> Result<PathBuf, ImageCodecError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.save_at(image, timestamp)
    }

    pub fn save_at(&self, image: &RgbImage, timestamp: u64) -> Result<PathBuf, ImageCodecError> {
        let path = self.path_for(timestamp);
        image
            .save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|source| ImageCodecError::Save {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}
