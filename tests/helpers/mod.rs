//! Shared harness for the integration tests: a scripted transform engine,
//! in-memory backends on temporary directories, and HTTP helpers for the
//! end-to-end suite.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use uuid::Uuid;

use media_batch::db::{MemoryRepository, Repository};
use media_batch::models::{BatchJob, LifecycleStatus, MediaAsset, OperationRecord};
use media_batch::services::batch::BatchOrchestrator;
use media_batch::services::broker::MemoryBroker;
use media_batch::services::engine::{EngineError, TransformEngine, TransformRequest};
use media_batch::services::lifecycle::StatusLifecycle;
use media_batch::services::notifier::Notifier;
use media_batch::services::pipeline::PipelineExecutor;
use media_batch::services::storage::{BlobStore, LocalBlobStore, StorageError};
use media_batch::services::sweep::RetrySweepScheduler;
use media_batch::services::telemetry::PipelineMetrics;
use media_batch::services::validation::OperationValidator;

use crate::fixtures::{SOURCE_BYTES, SOURCE_DURATION_SECS};

/// Engine that writes a small file per call and fails on chosen calls.
#[derive(Default)]
pub struct ScriptedEngine {
    calls: Mutex<Vec<TransformRequest>>,
    fail_on: HashSet<usize>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the call with this zero-based index; earlier and later calls succeed.
    pub fn failing_at(call: usize) -> Self {
        Self {
            calls: Mutex::default(),
            fail_on: HashSet::from([call]),
        }
    }

    pub fn calls(&self) -> Vec<TransformRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransformEngine for ScriptedEngine {
    async fn transform(&self, request: &TransformRequest) -> Result<PathBuf, EngineError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len() - 1
        };

        if self.fail_on.contains(&call) {
            return Err(EngineError::Failed {
                exit_code: Some(1),
                stderr: format!("scripted failure on call {call}"),
            });
        }

        let input = tokio::fs::read(&request.input).await?;
        let mut output = input;
        output.extend_from_slice(format!("|{}", request.operation.kind()).as_bytes());
        tokio::fs::write(&request.output, output).await?;
        Ok(request.output.clone())
    }

    async fn probe_duration(&self, _path: &Path) -> Result<Option<f64>, EngineError> {
        Ok(Some(SOURCE_DURATION_SECS))
    }
}

/// Local store whose first `failures` uploads are refused.
pub struct FlakyStore {
    inner: LocalBlobStore,
    failures_left: AtomicU32,
}

impl FlakyStore {
    pub fn new(root: &Path, failures: u32) -> Self {
        Self {
            inner: LocalBlobStore::new(root),
            failures_left: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl BlobStore for FlakyStore {
    async fn upload(&self, local: &Path, logical_name: &str) -> Result<String, StorageError> {
        let refuse = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(StorageError::Rejected {
                status: 503,
                key: logical_name.to_string(),
            });
        }
        self.inner.upload(local, logical_name).await
    }

    async fn download(&self, url: &str, local: &Path) -> Result<(), StorageError> {
        self.inner.download(url, local).await
    }

    async fn exists(&self, logical_name: &str) -> Result<bool, StorageError> {
        self.inner.exists(logical_name).await
    }
}

/// In-memory wiring of the whole pipeline on temporary directories.
pub struct Harness {
    root: TempDir,
    pub engine: Arc<ScriptedEngine>,
    pub assets: Arc<MemoryRepository<MediaAsset>>,
    pub operations: Arc<MemoryRepository<OperationRecord>>,
    pub batches: Arc<MemoryRepository<BatchJob>>,
    pub broker: Arc<MemoryBroker>,
    pub storage: Arc<dyn BlobStore>,
    pub lifecycle: StatusLifecycle,
    pub metrics: Arc<PipelineMetrics>,
}

impl Harness {
    pub fn new(engine: ScriptedEngine, max_retries: i32) -> Self {
        let root = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalBlobStore::new(root.path().join("storage")));
        Self::with_storage(root, engine, max_retries, storage)
    }

    /// Harness whose first `failures` storage uploads are refused.
    pub fn with_flaky_storage(failures: u32, max_retries: i32) -> Self {
        let root = tempfile::tempdir().unwrap();
        let storage = Arc::new(FlakyStore::new(&root.path().join("storage"), failures));
        Self::with_storage(root, ScriptedEngine::new(), max_retries, storage)
    }

    fn with_storage(root: TempDir, engine: ScriptedEngine, max_retries: i32, storage: Arc<dyn BlobStore>) -> Self {
        Self {
            root,
            engine: Arc::new(engine),
            assets: Arc::new(MemoryRepository::<MediaAsset>::new()),
            operations: Arc::new(MemoryRepository::<OperationRecord>::new()),
            batches: Arc::new(MemoryRepository::<BatchJob>::new()),
            broker: Arc::new(MemoryBroker::new()),
            storage,
            lifecycle: StatusLifecycle::new(max_retries),
            metrics: Arc::new(PipelineMetrics::default()),
        }
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.path().join("scratch")
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.root.path().join("storage")
    }

    pub fn notifier(&self) -> Notifier {
        Notifier::new(self.broker.clone(), self.metrics.clone())
    }

    pub fn executor(&self) -> PipelineExecutor {
        PipelineExecutor::new(
            self.engine.clone(),
            self.operations.clone(),
            self.lifecycle,
            self.notifier(),
            self.metrics.clone(),
            self.scratch_dir(),
        )
    }

    pub fn orchestrator(&self) -> BatchOrchestrator {
        BatchOrchestrator::new(
            self.assets.clone(),
            self.batches.clone(),
            OperationValidator::default(),
            self.executor(),
            self.storage.clone(),
            self.lifecycle,
            self.notifier(),
            self.metrics.clone(),
            self.scratch_dir(),
        )
    }

    pub fn sweep(&self) -> RetrySweepScheduler {
        RetrySweepScheduler::new(
            self.assets.clone(),
            self.storage.clone(),
            self.lifecycle,
            self.notifier(),
            self.metrics.clone(),
            std::time::Duration::from_millis(10),
        )
    }

    /// Write a source file outside scratch space and record a promoted asset for it.
    pub async fn seed_asset(&self) -> MediaAsset {
        self.seed_asset_with(LifecycleStatus::Completed, 0).await
    }

    pub async fn seed_asset_with(&self, status: LifecycleStatus, retry_count: i32) -> MediaAsset {
        let uploads = self.root.path().join("uploads");
        tokio::fs::create_dir_all(&uploads).await.unwrap();
        let id = Uuid::new_v4();
        let local = uploads.join(format!("{id}.mp4"));
        tokio::fs::write(&local, SOURCE_BYTES).await.unwrap();

        let mut asset = MediaAsset::new(
            id,
            "clip.mp4",
            &local.to_string_lossy(),
            "mp4",
            SOURCE_BYTES.len() as i64,
        );
        asset.duration_secs = Some(SOURCE_DURATION_SECS);
        asset.status = status;
        asset.retry_count = retry_count;
        self.assets.save(&asset).await.unwrap();
        asset
    }

    /// Files currently in the scratch directory (empty if it does not exist).
    pub fn scratch_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.scratch_dir()) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Local path behind a `local://` URL returned by the store.
    pub fn stored_path(&self, url: &str) -> PathBuf {
        self.storage_dir()
            .join(url.strip_prefix("local://").expect("local storage URL"))
    }
}

/// Base URL of a running server for the end-to-end suite.
pub fn base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

/// POST a file to /api/v1/assets and return the asset JSON.
pub async fn upload_media(
    client: &reqwest::Client,
    base_url: &str,
    filename: &str,
    bytes: Vec<u8>,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")?,
    );

    let response = client
        .post(format!("{}/api/v1/assets", base_url))
        .multipart(form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }
    Ok(response.json().await?)
}
