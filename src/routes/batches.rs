use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::MediaError;
use crate::models::{BatchRequest, BatchResponse};

/// POST /api/v1/batches: validate and run an operation chain.
///
/// Processing is synchronous; the response reflects the final status.
pub async fn submit_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, MediaError> {
    let job = state.batches.submit(&request).await?;
    Ok(Json(BatchResponse::from(&job)))
}

/// GET /api/v1/batches/{batch_id}
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchResponse>, MediaError> {
    let job = state.batches.get(batch_id).await?;
    Ok(Json(BatchResponse::from(&job)))
}
