use crate::detection::Detection;
use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to load model: {0}")]
    Load(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Unexpected model output shape: {0:?}")]
    OutputShape(Vec<usize>),
    #[error("Model reports {model} classes but the label table has {labels}")]
    LabelMismatch { model: usize, labels: usize },
    #[error("Inference task failed: {0}")]
    Join(String),
}

#[async_trait]
pub trait ModelService: Send + Sync + Clone + 'static {
    async fn predict(&self, image: RgbImage) -> Result<Vec<Detection>, ModelError>;
}
