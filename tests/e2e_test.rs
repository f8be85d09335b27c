//! End-to-end tests against a running server.
//!
//! These tests require:
//! 1. The API server running (standalone mode is enough)
//! 2. ffmpeg and ffprobe on the server's PATH
//! 3. A short sample clip at tests/data/sample.mp4
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture
//!
//! Set API_BASE_URL to override default (http://localhost:3000)

mod fixtures;
mod helpers;

use helpers::*;
use serde_json::json;
use std::path::PathBuf;

fn sample_clip() -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/sample.mp4");
    std::fs::read(&path).unwrap_or_else(|e| panic!("missing {}: {e}", path.display()))
}

#[tokio::test]
#[ignore] // Requires a running API server
async fn test_e2e_health_check() {
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", base_url()))
        .send()
        .await
        .expect("Health check failed");

    assert!(
        response.status().is_success(),
        "Health check returned non-success status: {}",
        response.status()
    );
}

#[tokio::test]
#[ignore] // Requires a running API server and ffmpeg
async fn test_e2e_upload_then_cut_and_resize() {
    let client = reqwest::Client::new();
    let base = base_url();

    let asset = upload_media(&client, &base, "sample.mp4", sample_clip())
        .await
        .expect("upload failed");
    assert_eq!(asset["status"], "completed");
    let asset_id = asset["id"].as_str().unwrap().to_string();

    let response = client
        .post(format!("{}/api/v1/batches", base))
        .json(&json!({
            "asset_id": asset_id,
            "operations": [
                { "type": "cut", "start": "00:00:00", "end": "00:00:02" },
                { "type": "resize", "width": 1280, "height": 720 }
            ]
        }))
        .send()
        .await
        .expect("batch request failed");
    assert!(response.status().is_success(), "batch failed: {}", response.status());

    let batch: serde_json::Value = response.json().await.unwrap();
    assert_eq!(batch["status"], "completed");
    assert_eq!(batch["operations"], json!(["cut", "resize"]));
    assert!(batch["artifact_url"].as_str().unwrap().ends_with("_processed.mp4"));

    let fetched: serde_json::Value = client
        .get(format!("{}/api/v1/batches/{}", base, batch["batch_id"].as_str().unwrap()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["status"], "completed");
}

#[tokio::test]
#[ignore] // Requires a running API server
async fn test_e2e_invalid_chain_is_unprocessable() {
    let client = reqwest::Client::new();
    let base = base_url();

    let asset = upload_media(&client, &base, "sample.mp4", sample_clip())
        .await
        .expect("upload failed");

    let response = client
        .post(format!("{}/api/v1/batches", base))
        .json(&json!({
            "asset_id": asset["id"],
            "operations": [{ "type": "resize", "width": 0, "height": 0 }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["violations"][0]["operation"], "resize");
}

#[tokio::test]
#[ignore] // Requires a running API server
async fn test_e2e_unknown_batch_is_not_found() {
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/v1/batches/{}", base_url(), uuid::Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
