use crate::{
    config::{Config, Validatable},
    image_codec::UploadStore,
    labels::ClassLabels,
    ort_service::OrtModelService,
    server::{HttpServer, SharedState},
    telemetry::Metrics,
};
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let labels = ClassLabels::load(&config.labels.get_path())?;

    let model_service = match OrtModelService::new(&config.model, labels) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!("Failed to initialize model service: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let upload_store = UploadStore::new(&config.storage.upload_dir)?;
    tracing::info!("Saving uploads under {:?}", upload_store.upload_dir());

    let state = SharedState {
        model_service: Arc::new(model_service),
        upload_store,
        frontend: config.frontend.clone(),
        metrics: Arc::new(Metrics::new()?),
    };

    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
