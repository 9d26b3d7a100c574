mod app;
mod detection;
mod image_codec;
mod labels;
mod model_service;
mod ort_service;
mod routes;
mod server;
mod telemetry;

pub mod config;

pub use app::{shutdown_signal, start_app};
pub use detection::{BoundingBox, Detection};
pub use image_codec::{decode_base64_image, strip_data_uri, ImageCodecError, UploadStore};
pub use labels::{ClassLabels, LabelsError};
pub use model_service::{ModelError, ModelService};
pub use ort_service::{DetectionParams, OrtModelService};
pub use routes::{DetectError, DetectRequest, DetectResponse};
pub use server::{build_router, HttpServer, SharedState};
pub use telemetry::Metrics;
