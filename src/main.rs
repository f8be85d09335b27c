use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use media_batch::app_state::{AppState, Components};
use media_batch::config::AppConfig;
use media_batch::routes;
use media_batch::services::telemetry::PipelineMetrics;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing media-batch server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    let metrics = PipelineMetrics::register();

    let components = Components::from_config(config.clone(), metrics)
        .await
        .expect("Failed to initialize backends");

    let cancel = CancellationToken::new();
    let mut background = Vec::new();
    if config.standalone() {
        tracing::info!("Standalone mode, running consumers and retry sweep in process");
        background.extend(components.spawn_consumers(&cancel));
        background.push(components.spawn_sweep(&cancel));
    }

    let state = AppState::new(&components, cancel.clone());
    let app = routes::router(state, prometheus_handle, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
            shutdown.cancel();
        })
        .await
        .expect("Server error");

    cancel.cancel();
    for task in background {
        let _ = task.await;
    }
    tracing::info!("Server stopped");
}
