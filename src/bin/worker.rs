use media_batch::{app_state::Components, config::AppConfig, services::broker::NotificationTopic,
    services::telemetry::PipelineMetrics};
use strum::IntoEnumIterator;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting media-batch worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    if config.standalone() {
        tracing::warn!("REDIS_URL not set; this worker only sees its own in-memory queues");
    }

    let components = Components::from_config(config, PipelineMetrics::register())
        .await
        .expect("Failed to initialize backends");

    for topic in NotificationTopic::iter() {
        match components.broker.depth(topic).await {
            Ok(depth) => tracing::info!(topic = %topic, depth, "Notification queue depth"),
            Err(e) => tracing::warn!(topic = %topic, error = %e, "Could not read queue depth"),
        }
    }

    let cancel = CancellationToken::new();
    let mut tasks = components.spawn_consumers(&cancel);
    tasks.push(components.spawn_sweep(&cancel));

    tracing::info!(consumers = tasks.len() - 1, "Worker ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown requested, stopping consumers and sweep");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    tracing::info!("Worker stopped");
}
