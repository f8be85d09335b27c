//! Asset ingestion and the bounded upload worker pool.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::Repository;
use crate::error::MediaError;
use crate::models::{LifecycleStatus, MediaAsset, OutputFormat};
use crate::services::broker::NotificationTopic;
use crate::services::engine::TransformEngine;
use crate::services::lifecycle::{StatusLifecycle, Transition};
use crate::services::notifier::Notifier;
use crate::services::storage::BlobStore;
use crate::services::telemetry::PipelineMetrics;

/// Stores an uploaded file, records it, and promotes it to durable storage.
pub struct AssetUploadService {
    assets: Arc<dyn Repository<MediaAsset>>,
    storage: Arc<dyn BlobStore>,
    engine: Arc<dyn TransformEngine>,
    lifecycle: StatusLifecycle,
    notifier: Notifier,
    metrics: Arc<PipelineMetrics>,
    upload_dir: PathBuf,
}

impl AssetUploadService {
    pub fn new(
        assets: Arc<dyn Repository<MediaAsset>>,
        storage: Arc<dyn BlobStore>,
        engine: Arc<dyn TransformEngine>,
        lifecycle: StatusLifecycle,
        notifier: Notifier,
        metrics: Arc<PipelineMetrics>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            assets,
            storage,
            engine,
            lifecycle,
            notifier,
            metrics,
            upload_dir: scratch_dir.into().join("uploads"),
        }
    }

    /// Ingest one file.
    ///
    /// A failed promotion is not an error for the caller: the asset is
    /// returned in `Error` and the retry sweep picks it up later.
    pub async fn ingest(&self, filename: &str, data: &[u8]) -> Result<MediaAsset, MediaError> {
        let format = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| OutputFormat::from_str(ext).is_ok())
            .ok_or_else(|| MediaError::BadRequest(format!("unsupported media file '{filename}'")))?;
        if data.is_empty() {
            return Err(MediaError::BadRequest("uploaded file is empty".to_string()));
        }

        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let id = Uuid::new_v4();
        let local = self.upload_dir.join(format!("{id}.{format}"));
        tokio::fs::write(&local, data).await?;

        let mut asset = MediaAsset::new(
            id,
            filename,
            &local.to_string_lossy(),
            &format,
            data.len() as i64,
        );
        asset.duration_secs = match self.engine.probe_duration(&local).await {
            Ok(duration) => duration,
            Err(e) => {
                warn!(asset_id = %id, error = %e, "Could not probe media duration");
                None
            }
        };
        self.assets.save(&asset).await?;
        debug!(asset_id = %id, filename, size = data.len(), "Asset recorded");

        let asset = match self.storage.upload(&local, &asset.storage_key()).await {
            Ok(url) => {
                self.metrics.asset_upload("promoted");
                info!(asset_id = %id, url = %url, "Asset promoted to durable storage");
                self.lifecycle
                    .transition_with(&*self.assets, id, Transition::Complete, |a| {
                        a.storage_url.get_or_insert_with(|| url.clone());
                    })
                    .await?
                    .record
            }
            Err(e) => {
                self.metrics.asset_upload("deferred");
                warn!(asset_id = %id, error = %e, "Promotion failed, leaving asset for the retry sweep");
                self.lifecycle
                    .transition(&*self.assets, id, Transition::Fail)
                    .await?
                    .record
            }
        };

        self.notifier
            .publish(NotificationTopic::Upload, asset.id, Some(asset.status))
            .await;
        Ok(asset)
    }

    pub async fn get(&self, asset_id: Uuid) -> Result<MediaAsset, MediaError> {
        self.assets
            .find_by_id(asset_id)
            .await?
            .ok_or(MediaError::MissingResource {
                kind: "asset",
                id: asset_id,
            })
    }
}

struct UploadJob {
    filename: String,
    data: Vec<u8>,
    reply: oneshot::Sender<Result<MediaAsset, MediaError>>,
}

/// Fixed set of upload workers behind a bounded queue.
///
/// Requests wait in the queue while every worker is busy; once the queue is
/// full new requests are refused with [`MediaError::Saturated`].
#[derive(Clone)]
pub struct UploadPool {
    sender: mpsc::Sender<UploadJob>,
}

impl UploadPool {
    pub fn start(
        service: Arc<AssetUploadService>,
        workers: usize,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        for worker in 0..workers.max(1) {
            tokio::spawn(run_worker(
                worker,
                service.clone(),
                receiver.clone(),
                cancel.clone(),
            ));
        }
        info!(workers, queue_capacity, "Upload pool started");
        Self { sender }
    }

    pub async fn submit(&self, filename: String, data: Vec<u8>) -> Result<MediaAsset, MediaError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .try_send(UploadJob {
                filename,
                data,
                reply,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => MediaError::Saturated,
                TrySendError::Closed(_) => MediaError::Infrastructure("upload pool is stopped".to_string()),
            })?;

        response
            .await
            .map_err(|_| MediaError::Infrastructure("upload worker dropped the request".to_string()))?
    }

    /// Requests waiting for a worker.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

async fn run_worker(
    worker: usize,
    service: Arc<AssetUploadService>,
    receiver: Arc<Mutex<mpsc::Receiver<UploadJob>>>,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = async { receiver.lock().await.recv().await } => job,
        };
        let Some(job) = job else { break };

        let result = service.ingest(&job.filename, &job.data).await;
        if let Err(e) = &result {
            warn!(worker, filename = %job.filename, error = %e, "Upload failed");
        }
        // The requester may have gone away; nothing to do then.
        let _ = job.reply.send(result);
    }
    debug!(worker, "Upload worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRepository;
    use crate::services::broker::MemoryBroker;
    use crate::services::engine::{EngineError, TransformRequest};
    use crate::services::storage::{LocalBlobStore, StorageError};
    use async_trait::async_trait;
    use std::path::Path;

    struct NoEngine;

    #[async_trait]
    impl TransformEngine for NoEngine {
        async fn transform(&self, request: &TransformRequest) -> Result<PathBuf, EngineError> {
            Err(EngineError::MissingOutput(request.output.clone()))
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl BlobStore for BrokenStore {
        async fn upload(&self, _: &Path, name: &str) -> Result<String, StorageError> {
            Err(StorageError::Rejected { status: 503, key: name.to_string() })
        }
        async fn download(&self, url: &str, _: &Path) -> Result<(), StorageError> {
            Err(StorageError::InvalidUrl(url.to_string()))
        }
        async fn exists(&self, _: &str) -> Result<bool, StorageError> {
            Ok(false)
        }
    }

    fn service(storage: Arc<dyn BlobStore>, scratch: &Path) -> (AssetUploadService, Arc<MemoryBroker>) {
        let broker = Arc::new(MemoryBroker::new());
        let metrics = PipelineMetrics::register();
        let service = AssetUploadService::new(
            Arc::new(MemoryRepository::<MediaAsset>::new()),
            storage,
            Arc::new(NoEngine),
            StatusLifecycle::new(3),
            Notifier::new(broker.clone(), metrics.clone()),
            metrics,
            scratch,
        );
        (service, broker)
    }

    #[tokio::test]
    async fn test_ingest_promotes_and_notifies() {
        let scratch = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        let (service, broker) = service(Arc::new(LocalBlobStore::new(store.path())), scratch.path());

        let asset = service.ingest("Holiday.MP4", b"fake video").await.unwrap();
        assert_eq!(asset.status, LifecycleStatus::Completed);
        assert_eq!(asset.format, "mp4");
        assert_eq!(asset.size_bytes, 10);
        assert_eq!(
            asset.storage_url.as_deref(),
            Some(format!("local://assets/{}.mp4", asset.id).as_str())
        );
        assert!(Path::new(&asset.local_path).exists());

        let pending = broker.pending(NotificationTopic::Upload).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].body, asset.id.to_string());
    }

    #[tokio::test]
    async fn test_failed_promotion_leaves_asset_in_error() {
        let scratch = tempfile::tempdir().unwrap();
        let (service, _) = service(Arc::new(BrokenStore), scratch.path());

        let asset = service.ingest("clip.mov", b"data").await.unwrap();
        assert_eq!(asset.status, LifecycleStatus::Error);
        assert_eq!(asset.retry_count, 1);
        assert!(asset.storage_url.is_none());
        assert!(Path::new(&asset.local_path).exists());
    }

    #[tokio::test]
    async fn test_rejects_unknown_extensions() {
        let scratch = tempfile::tempdir().unwrap();
        let (service, _) = service(Arc::new(BrokenStore), scratch.path());

        assert!(matches!(
            service.ingest("notes.txt", b"hello").await,
            Err(MediaError::BadRequest(_))
        ));
        assert!(matches!(
            service.ingest("clip.mp4", b"").await,
            Err(MediaError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_pool_processes_submissions() {
        let scratch = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        let (service, _) = service(Arc::new(LocalBlobStore::new(store.path())), scratch.path());
        let cancel = CancellationToken::new();
        let pool = UploadPool::start(Arc::new(service), 2, 4, cancel.clone());

        let submissions = (0..3).map(|i| pool.submit(format!("clip{i}.mp4"), vec![1, 2, 3]));
        let results = futures::future::join_all(submissions).await;
        assert!(results.iter().all(|r| matches!(r, Ok(a) if a.status == LifecycleStatus::Completed)));
        cancel.cancel();
    }
}
