pub mod assets;
pub mod batches;
pub mod health;
pub mod metrics;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// The full HTTP surface.
pub fn router(state: AppState, prometheus: Arc<PrometheusHandle>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/assets", post(assets::upload_asset))
        .route("/api/v1/assets/{asset_id}", get(assets::get_asset))
        .route("/api/v1/batches", post(batches::submit_batch))
        .route("/api/v1/batches/{batch_id}", get(batches::get_batch))
        .with_state(state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(prometheus),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
}
