//! Request fixtures shared by the integration tests.
#![allow(dead_code)]

use serde_json::{json, Value};
use uuid::Uuid;

use media_batch::models::{BatchRequest, RawOperation};

/// Probed duration given to seeded assets, in seconds.
pub const SOURCE_DURATION_SECS: f64 = 60.0;

/// Bytes written as the seeded source file.
pub const SOURCE_BYTES: &[u8] = b"\x00\x00\x00\x18ftypmp42 fake media payload";

pub fn raw(value: Value) -> RawOperation {
    serde_json::from_value(value).expect("fixture operation must deserialize")
}

pub fn cut(start: &str, end: &str) -> RawOperation {
    raw(json!({ "type": "cut", "start": start, "end": end }))
}

pub fn resize(width: u32, height: u32) -> RawOperation {
    raw(json!({ "type": "resize", "width": width, "height": height }))
}

pub fn convert(target_format: &str) -> RawOperation {
    raw(json!({ "type": "convert", "target_format": target_format }))
}

pub fn overlay(text: &str, position: &str) -> RawOperation {
    raw(json!({ "type": "overlay", "text": text, "position": position }))
}

pub fn batch_request(asset_id: Uuid, operations: Vec<RawOperation>) -> BatchRequest {
    BatchRequest {
        asset_id,
        operations,
    }
}
