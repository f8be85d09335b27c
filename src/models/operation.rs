use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use super::status::{impl_record, LifecycleStatus};

/// Kind of transform applied by one pipeline stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, IntoStaticStr, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    Cut,
    Resize,
    Convert,
    Overlay,
}

/// Container formats the transform engine can produce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, IntoStaticStr, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputFormat {
    Mp4,
    Mov,
    Avi,
    Mkv,
    Webm,
    Gif,
    Mp3,
    Wav,
    Aac,
}

impl OutputFormat {
    /// File extension (without the dot) for this format.
    pub fn extension(self) -> &'static str {
        self.into()
    }
}

/// Anchor for a text overlay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum OverlayPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

/// One requested transform. Only produced by the operation validator, so a
/// value of this type always satisfies the chain rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationSpec {
    Cut {
        start: String,
        end: String,
    },
    Resize {
        width: u32,
        height: u32,
    },
    Convert {
        target_format: OutputFormat,
    },
    Overlay {
        text: String,
        position: OverlayPosition,
        font_size: u32,
    },
}

impl OperationSpec {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Cut { .. } => OperationKind::Cut,
            Self::Resize { .. } => OperationKind::Resize,
            Self::Convert { .. } => OperationKind::Convert,
            Self::Overlay { .. } => OperationKind::Overlay,
        }
    }
}

/// An operation exactly as the caller sent it: a `type` tag plus loose
/// parameters. Unknown or missing types are reported by the validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawOperation {
    #[serde(rename = "type", default)]
    pub op_type: Option<String>,

    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Persisted audit/status row for one executed pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub batch_id: Uuid,
    pub kind: OperationKind,
    pub params: OperationSpec,
    pub input_path: String,
    pub output_path: Option<String>,
    pub error: Option<String>,
    pub status: LifecycleStatus,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OperationRecord {
    /// A freshly started stage, in `Processing`.
    pub fn start(asset_id: Uuid, batch_id: Uuid, spec: &OperationSpec, input_path: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            asset_id,
            batch_id,
            kind: spec.kind(),
            params: spec.clone(),
            input_path: input_path.to_string(),
            output_path: None,
            error: None,
            status: LifecycleStatus::Processing,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

impl_record!(OperationRecord, "operation");
