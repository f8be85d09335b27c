use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::db::RepositoryError;
use crate::models::LifecycleStatus;
use crate::services::broker::BrokerError;
use crate::services::lifecycle::LifecycleError;
use crate::services::pipeline::PipelineError;
use crate::services::storage::StorageError;
use crate::services::validation::ValidationErrors;

/// Errors surfaced to callers of the batch and asset entry points.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("processing failed: {0}")]
    Processing(#[from] PipelineError),

    #[error("{kind} {id} not found")]
    MissingResource { kind: &'static str, id: Uuid },

    #[error("infrastructure unavailable: {0}")]
    Infrastructure(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upload queue is full")]
    Saturated,

    /// A batch failed after its record was created; its status is already
    /// durable when this is returned.
    #[error("batch {batch_id} ended in {status}: {source}")]
    BatchFailed {
        batch_id: Uuid,
        status: LifecycleStatus,
        source: Box<MediaError>,
    },
}

impl From<RepositoryError> for MediaError {
    fn from(e: RepositoryError) -> Self {
        Self::Infrastructure(e.to_string())
    }
}

impl From<StorageError> for MediaError {
    fn from(e: StorageError) -> Self {
        Self::Infrastructure(e.to_string())
    }
}

impl From<BrokerError> for MediaError {
    fn from(e: BrokerError) -> Self {
        Self::Infrastructure(e.to_string())
    }
}

impl From<std::io::Error> for MediaError {
    fn from(e: std::io::Error) -> Self {
        Self::Infrastructure(format!("I/O error: {e}"))
    }
}

impl From<LifecycleError> for MediaError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::NotFound { kind, id } => Self::MissingResource { kind, id },
            LifecycleError::Repository(e) => e.into(),
        }
    }
}

impl MediaError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingResource { .. } => StatusCode::NOT_FOUND,
            Self::Infrastructure(_) | Self::Saturated => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::BatchFailed { source, .. } => source.status_code(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Processing(_) => "processing_error",
            Self::MissingResource { .. } => "not_found",
            Self::Infrastructure(_) => "infrastructure_error",
            Self::BadRequest(_) => "bad_request",
            Self::Saturated => "saturated",
            Self::BatchFailed { source, .. } => source.code(),
        }
    }
}

impl IntoResponse for MediaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });

        let detail = match &self {
            Self::BatchFailed { batch_id, status, source } => {
                body["batch_id"] = json!(batch_id);
                body["status"] = json!(status);
                source.as_ref()
            }
            other => other,
        };
        if let Self::Validation(errors) = detail {
            body["violations"] = json!(errors.violations);
        }
        if let Self::Processing(PipelineError::Stage { index, kind, .. }) = detail {
            body["failed_stage"] = json!({ "index": index, "type": kind });
        }

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::validation::Violation;

    #[test]
    fn test_status_codes() {
        let validation = MediaError::Validation(ValidationErrors {
            violations: vec![Violation {
                index: Some(0),
                operation: Some("resize".into()),
                message: "width: lower than 1".into(),
            }],
        });
        assert_eq!(validation.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let missing = MediaError::MissingResource { kind: "asset", id: Uuid::nil() };
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let wrapped = MediaError::BatchFailed {
            batch_id: Uuid::nil(),
            status: LifecycleStatus::Error,
            source: Box::new(MediaError::Infrastructure("s3 down".into())),
        };
        assert_eq!(wrapped.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_lifecycle_not_found_maps_to_missing_resource() {
        let id = Uuid::new_v4();
        let err: MediaError = LifecycleError::NotFound { kind: "batch", id }.into();
        assert!(matches!(err, MediaError::MissingResource { kind: "batch", id: got } if got == id));
    }
}
