mod detect;

use crate::{model_service::ModelService, server::SharedState};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

pub use detect::{DetectError, DetectRequest, DetectResponse};

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route("/", get(index::<M>))
        .route(
            "/api/detect",
            post(detect::detect::<M>).layer(DefaultBodyLimit::disable()),
        )
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_handler::<M>))
}

#[instrument(skip(state))]
async fn index<M: ModelService>(State(state): State<SharedState<M>>) -> Response {
    state.metrics.record_request("/");
    let index_path = state.frontend.get_index_path();

    match tokio::fs::read_to_string(&index_path).await {
        Ok(page) => Html(page).into_response(),
        Err(e) => {
            tracing::error!("Failed to read {:?}: {}", index_path, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
}

async fn healthcheck() -> Json<Status> {
    Json(Status {
        status: "Available".into(),
    })
}

async fn metrics_handler<M: ModelService>(State(state): State<SharedState<M>>) -> Response {
    match state.metrics.encode() {
        Ok(text) => text.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
