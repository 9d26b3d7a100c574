use crate::{
    detection::Detection,
    image_codec::{decode_base64_image, ImageCodecError},
    model_service::{ModelError, ModelService},
    server::SharedState,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const DETECT_ROUTE: &str = "/api/detect";

/// `image` is `None` only when the key is absent; an explicit `null` is kept as `Value::Null`.
#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    #[serde(default, deserialize_with = "present")]
    pub image: Option<Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetectResponse {
    pub success: bool,
    pub detections: Vec<Detection>,
}

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("No image data provided")]
    MissingImage,
    #[error("{0}")]
    InvalidBody(String),
    #[error("Image data must be a base64 string, got {0}")]
    NotAString(&'static str),
    #[error("{0}")]
    ImageCodec(#[from] ImageCodecError),
    #[error("{0}")]
    Model(#[from] ModelError),
    #[error("Image processing task failed: {0}")]
    Join(String),
}

impl IntoResponse for DetectError {
    fn into_response(self) -> Response {
        let status = match self {
            DetectError::MissingImage | DetectError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            DetectError::NotAString(_)
            | DetectError::ImageCodec(_)
            | DetectError::Model(_)
            | DetectError::Join(_) => {
                tracing::error!("Detection failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[instrument(skip(state, payload))]
pub async fn detect<M: ModelService>(
    State(state): State<SharedState<M>>,
    payload: Result<Json<DetectRequest>, JsonRejection>,
) -> Result<Json<DetectResponse>, DetectError> {
    state.metrics.record_request(DETECT_ROUTE);

    let Json(request) = payload.map_err(|e| DetectError::InvalidBody(e.body_text()))?;
    let image_data = match request.image.ok_or(DetectError::MissingImage)? {
        Value::String(image_data) => image_data,
        other => return Err(DetectError::NotAString(json_kind(&other))),
    };

    let started = Instant::now();
    let upload_store = state.upload_store.clone();
    let (image, upload_path) = tokio::task::spawn_blocking(move || {
        let image = decode_base64_image(&image_data)?;
        let upload_path = upload_store.save(&image)?;
        Ok::<_, ImageCodecError>((image, upload_path))
    })
    .await
    .map_err(|e| DetectError::Join(e.to_string()))??;

    tracing::debug!(
        "Saved {}x{} upload to {:?}",
        image.width(),
        image.height(),
        upload_path
    );

    let detections = state.model_service.predict(image).await?;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    state
        .metrics
        .record_detection(elapsed_ms, detections.len(), DETECT_ROUTE);
    tracing::debug!("Returning {} detections in {} ms", detections.len(), elapsed_ms);

    Ok(Json(DetectResponse {
        success: true,
        detections,
    }))
}
