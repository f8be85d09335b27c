use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::time::Instant;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub broker: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    /// "ok", "error", or "in_memory" when the backend is process-local.
    pub status: &'static str,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn timed<E>(start: Instant, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                status: "ok",
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(_) => Self {
                status: "error",
                latency_ms: None,
            },
        }
    }

    fn healthy(&self) -> bool {
        self.status != "error"
    }
}

/// GET /health: dependency reachability.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match &state.db {
        Some(pool) => {
            let start = Instant::now();
            let result = sqlx::query("SELECT 1").execute(pool).await.map(|_| ());
            ComponentHealth::timed(start, result)
        }
        None => ComponentHealth {
            status: "in_memory",
            latency_ms: None,
        },
    };

    let start = Instant::now();
    let broker = ComponentHealth::timed(start, state.broker.health_check().await);

    let all_healthy = database.healthy() && broker.healthy();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if all_healthy { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            checks: HealthChecks { database, broker },
        }),
    )
}
