use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::operation::{OperationKind, OperationSpec, RawOperation};
use super::status::{impl_record, LifecycleStatus};

/// One end-to-end request to run an ordered operation chain on an asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: Uuid,
    pub asset_id: Uuid,
    /// Execution order is the order of this list.
    pub operations: Vec<OperationSpec>,
    pub processing_steps: Vec<OperationKind>,
    pub status: LifecycleStatus,
    pub retry_count: i32,
    pub artifact_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchJob {
    pub fn new(asset_id: Uuid, operations: Vec<OperationSpec>) -> Self {
        let now = Utc::now();
        let processing_steps = operations.iter().map(OperationSpec::kind).collect();
        Self {
            id: Uuid::new_v4(),
            asset_id,
            operations,
            processing_steps,
            status: LifecycleStatus::Processing,
            retry_count: 0,
            artifact_url: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl_record!(BatchJob, "batch");

/// Body of `POST /api/v1/batches`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub asset_id: Uuid,
    pub operations: Vec<RawOperation>,
}

/// Response for batch submission and status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub batch_id: Uuid,
    pub asset_id: Uuid,
    pub status: LifecycleStatus,
    pub operations: Vec<OperationKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&BatchJob> for BatchResponse {
    fn from(job: &BatchJob) -> Self {
        Self {
            batch_id: job.id,
            asset_id: job.asset_id,
            status: job.status,
            operations: job.processing_steps.clone(),
            // Only a completed batch exposes its artifact.
            artifact_url: match job.status {
                LifecycleStatus::Completed => job.artifact_url.clone(),
                _ => None,
            },
            error: job.error.clone(),
        }
    }
}
