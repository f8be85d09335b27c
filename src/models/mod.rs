pub mod asset;
pub mod batch;
pub mod operation;
pub mod status;

pub use asset::MediaAsset;
pub use batch::{BatchJob, BatchRequest, BatchResponse};
pub use operation::{OperationKind, OperationRecord, OperationSpec, OutputFormat, OverlayPosition, RawOperation};
pub use status::{LifecycleStatus, Record, StatusTrackable};
