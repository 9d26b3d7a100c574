use crate::{
    config::{FrontendConfig, ServerConfig},
    image_codec::UploadStore,
    model_service::ModelService,
    routes::api_routes,
    telemetry::Metrics,
};
use axum::Router;
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

#[derive(Clone)]
pub struct SharedState<M: ModelService> {
    pub model_service: Arc<M>,
    pub upload_store: UploadStore,
    pub frontend: FrontendConfig,
    pub metrics: Arc<Metrics>,
}

pub fn build_router<M: ModelService>(state: SharedState<M>) -> Router {
    let static_files = ServeDir::new(&state.frontend.static_dir);

    Router::new()
        .merge(api_routes::<M>())
        .fallback_service(static_files)
        .with_state(state)
        .layer(HttpMetricsLayerBuilder::new().build())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(
        state: SharedState<M>,
        config: &ServerConfig,
    ) -> anyhow::Result<Self> {
        let router = build_router(state);
        let listener = TcpListener::bind(config.get_address()).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        });

        Ok(server_handle)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{body::Body, http::Request, response::Response};
    use std::path::Path;
    use tower::ServiceExt;

    pub(crate) fn test_state<M: ModelService>(model_service: M, dir: &Path) -> SharedState<M> {
        let static_dir = dir.join("www");
        std::fs::create_dir_all(static_dir.join("js")).unwrap();
        std::fs::write(static_dir.join("index.html"), "<h1>detector</h1>").unwrap();
        std::fs::write(static_dir.join("js/app.js"), "console.log('ok');").unwrap();

        SharedState {
            model_service: Arc::new(model_service),
            upload_store: UploadStore::new(dir.join("uploads")).unwrap(),
            frontend: FrontendConfig {
                static_dir,
                index_file: "index.html".to_string(),
            },
            metrics: Arc::new(Metrics::new().unwrap()),
        }
    }

    pub(crate) async fn send<M: ModelService>(
        state: SharedState<M>,
        request: Request<Body>,
    ) -> (Response, String) {
        let response = build_router(state).oneshot(request).await.unwrap();
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        (Response::from_parts(parts, Body::empty()), text)
    }
}
