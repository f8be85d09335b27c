use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::MediaError;
use crate::models::MediaAsset;

/// POST /api/v1/assets: upload a media file.
///
/// The file is handed to the upload pool; the response carries the asset in
/// `completed` when promotion succeeded or `error` when it was deferred to
/// the retry sweep.
pub async fn upload_asset(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<MediaAsset>), MediaError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| MediaError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("file") {
            let filename = field
                .file_name()
                .map(str::to_string)
                .ok_or_else(|| MediaError::BadRequest("file field has no filename".to_string()))?;
            let data = field
                .bytes()
                .await
                .map_err(|e| MediaError::BadRequest(e.to_string()))?;
            upload = Some((filename, data.to_vec()));
        }
    }

    let (filename, data) =
        upload.ok_or_else(|| MediaError::BadRequest("missing multipart field 'file'".to_string()))?;
    tracing::debug!(filename = %filename, size = data.len(), queued = state.uploads.queued(), "Upload received");
    let asset = state.uploads.submit(filename, data).await?;
    Ok((StatusCode::CREATED, Json(asset)))
}

/// GET /api/v1/assets/{asset_id}
pub async fn get_asset(
    State(state): State<AppState>,
    Path(asset_id): Path<Uuid>,
) -> Result<Json<MediaAsset>, MediaError> {
    Ok(Json(state.assets.get(asset_id).await?))
}
