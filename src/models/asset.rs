use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::{impl_record, LifecycleStatus};

/// An uploaded media file and its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: Uuid,
    pub filename: String,
    /// Scratch copy written at upload time.
    pub local_path: String,
    /// Durable location; set once on promotion and never changed after.
    pub storage_url: Option<String>,
    /// Lower-case container extension ("mp4", "mov", ...).
    pub format: String,
    pub duration_secs: Option<f64>,
    pub size_bytes: i64,
    pub status: LifecycleStatus,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaAsset {
    pub fn new(id: Uuid, filename: &str, local_path: &str, format: &str, size_bytes: i64) -> Self {
        let now = Utc::now();
        Self {
            id,
            filename: filename.to_string(),
            local_path: local_path.to_string(),
            storage_url: None,
            format: format.to_lowercase(),
            duration_secs: None,
            size_bytes,
            status: LifecycleStatus::Processing,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Logical blob name used when promoting this asset.
    pub fn storage_key(&self) -> String {
        format!("assets/{}.{}", self.id, self.format)
    }
}

impl_record!(MediaAsset, "asset");
