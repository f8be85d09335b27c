use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle status shared by every persisted processing record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleStatus {
    Processing,
    Completed,
    Error,
    FailedPermanently,
}

impl LifecycleStatus {
    /// `Completed` and `FailedPermanently` never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::FailedPermanently)
    }
}

/// Capability required by the status lifecycle manager.
///
/// Every record type whose status is driven by the state machine implements
/// this; nothing else is allowed to write these fields.
pub trait StatusTrackable {
    fn status(&self) -> LifecycleStatus;
    fn set_status(&mut self, status: LifecycleStatus);
    fn retry_count(&self) -> i32;
    fn set_retry_count(&mut self, retry_count: i32);
    fn updated_at(&self) -> DateTime<Utc>;
    fn set_updated_at(&mut self, updated_at: DateTime<Utc>);
}

/// A persisted record with identity.
pub trait Record: StatusTrackable + Clone + Send + Sync + 'static {
    /// Short name used in logs and error messages ("asset", "batch", ...).
    const KIND: &'static str;

    fn id(&self) -> Uuid;
}

/// Implements [`StatusTrackable`] and [`Record`] for structs carrying the
/// standard `id`, `status`, `retry_count` and `updated_at` fields.
macro_rules! impl_record {
    ($ty:ty, $kind:literal) => {
        impl $crate::models::status::StatusTrackable for $ty {
            fn status(&self) -> $crate::models::status::LifecycleStatus {
                self.status
            }

            fn set_status(&mut self, status: $crate::models::status::LifecycleStatus) {
                self.status = status;
            }

            fn retry_count(&self) -> i32 {
                self.retry_count
            }

            fn set_retry_count(&mut self, retry_count: i32) {
                self.retry_count = retry_count;
            }

            fn updated_at(&self) -> ::chrono::DateTime<::chrono::Utc> {
                self.updated_at
            }

            fn set_updated_at(&mut self, updated_at: ::chrono::DateTime<::chrono::Utc>) {
                self.updated_at = updated_at;
            }
        }

        impl $crate::models::status::Record for $ty {
            const KIND: &'static str = $kind;

            fn id(&self) -> ::uuid::Uuid {
                self.id
            }
        }
    };
}

pub(crate) use impl_record;
