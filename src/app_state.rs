use sqlx::PgPool;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::db::{self, MemoryRepository, PgAssetRepository, PgBatchRepository, PgOperationRepository, Repository};
use crate::error::MediaError;
use crate::models::{BatchJob, MediaAsset, OperationRecord};
use crate::services::{
    batch::BatchOrchestrator,
    broker::{MemoryBroker, MessageBroker, NotificationTopic, RedisBroker},
    consumer::{handler_for, NotificationConsumer},
    engine::{FfmpegEngine, TransformEngine},
    lifecycle::StatusLifecycle,
    notifier::Notifier,
    pipeline::PipelineExecutor,
    storage::{BlobStore, LocalBlobStore, S3BlobStore},
    sweep::RetrySweepScheduler,
    telemetry::PipelineMetrics,
    upload::{AssetUploadService, UploadPool},
    validation::OperationValidator,
};

/// Backends and shared handles, built once from configuration.
///
/// Both the server and the worker start from this; each then builds the
/// services it runs.
#[derive(Clone)]
pub struct Components {
    pub config: AppConfig,
    pub db: Option<PgPool>,
    pub assets: Arc<dyn Repository<MediaAsset>>,
    pub operations: Arc<dyn Repository<OperationRecord>>,
    pub batches: Arc<dyn Repository<BatchJob>>,
    pub broker: Arc<dyn MessageBroker>,
    pub storage: Arc<dyn BlobStore>,
    pub engine: Arc<dyn TransformEngine>,
    pub lifecycle: StatusLifecycle,
    pub metrics: Arc<PipelineMetrics>,
}

impl Components {
    pub async fn from_config(config: AppConfig, metrics: Arc<PipelineMetrics>) -> Result<Self, MediaError> {
        let (db, assets, operations, batches) = match &config.database_url {
            Some(url) => {
                tracing::info!("Connecting to PostgreSQL database");
                let pool = db::init_pool(url).await.map_err(db::RepositoryError::from)?;
                tracing::info!("Running database migrations");
                db::run_migrations(&pool).await.map_err(db::RepositoryError::from)?;

                let assets: Arc<dyn Repository<MediaAsset>> = Arc::new(PgAssetRepository::new(pool.clone()));
                let operations: Arc<dyn Repository<OperationRecord>> =
                    Arc::new(PgOperationRepository::new(pool.clone()));
                let batches: Arc<dyn Repository<BatchJob>> = Arc::new(PgBatchRepository::new(pool.clone()));
                (Some(pool), assets, operations, batches)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, records are kept in memory");
                let assets: Arc<dyn Repository<MediaAsset>> = Arc::new(MemoryRepository::<MediaAsset>::new());
                let operations: Arc<dyn Repository<OperationRecord>> =
                    Arc::new(MemoryRepository::<OperationRecord>::new());
                let batches: Arc<dyn Repository<BatchJob>> = Arc::new(MemoryRepository::<BatchJob>::new());
                (None, assets, operations, batches)
            }
        };

        let broker: Arc<dyn MessageBroker> = match &config.redis_url {
            Some(url) => {
                tracing::info!("Connecting to Redis notification broker");
                Arc::new(RedisBroker::new(url)?)
            }
            None => {
                tracing::warn!("REDIS_URL not set, notifications stay in process");
                Arc::new(MemoryBroker::new())
            }
        };

        let storage: Arc<dyn BlobStore> = match config.s3() {
            Some(s3) => {
                tracing::info!(bucket = s3.bucket, "Initializing S3 storage client");
                Arc::new(S3BlobStore::new(s3.bucket, s3.endpoint, s3.access_key, s3.secret_key)?)
            }
            None => {
                tracing::warn!(dir = %config.storage_dir.display(), "S3 not configured, using local storage");
                Arc::new(LocalBlobStore::new(&config.storage_dir))
            }
        };

        let engine = Arc::new(FfmpegEngine::new(
            &config.ffmpeg_path,
            &config.ffprobe_path,
            config.engine_timeout(),
        ));

        Ok(Self {
            lifecycle: StatusLifecycle::new(config.max_retries),
            config,
            db,
            assets,
            operations,
            batches,
            broker,
            storage,
            engine,
            metrics,
        })
    }

    pub fn notifier(&self) -> Notifier {
        Notifier::new(self.broker.clone(), self.metrics.clone())
    }

    pub fn orchestrator(&self) -> BatchOrchestrator {
        let executor = PipelineExecutor::new(
            self.engine.clone(),
            self.operations.clone(),
            self.lifecycle,
            self.notifier(),
            self.metrics.clone(),
            &self.config.scratch_dir,
        );
        BatchOrchestrator::new(
            self.assets.clone(),
            self.batches.clone(),
            OperationValidator::default(),
            executor,
            self.storage.clone(),
            self.lifecycle,
            self.notifier(),
            self.metrics.clone(),
            &self.config.scratch_dir,
        )
    }

    pub fn upload_service(&self) -> AssetUploadService {
        AssetUploadService::new(
            self.assets.clone(),
            self.storage.clone(),
            self.engine.clone(),
            self.lifecycle,
            self.notifier(),
            self.metrics.clone(),
            &self.config.scratch_dir,
        )
    }

    pub fn sweep(&self) -> RetrySweepScheduler {
        RetrySweepScheduler::new(
            self.assets.clone(),
            self.storage.clone(),
            self.lifecycle,
            self.notifier(),
            self.metrics.clone(),
            self.config.sweep_interval(),
        )
    }

    /// One consumer task per notification topic.
    pub fn spawn_consumers(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        NotificationTopic::iter()
            .map(|topic| {
                let handler = handler_for(
                    topic,
                    self.assets.clone(),
                    self.operations.clone(),
                    self.batches.clone(),
                );
                NotificationConsumer::new(
                    topic,
                    self.broker.clone(),
                    handler,
                    self.config.consumer_policy(),
                    self.config.consumer_poll_interval(),
                    self.metrics.clone(),
                    cancel.clone(),
                )
                .spawn()
            })
            .collect()
    }

    pub fn spawn_sweep(&self, cancel: &CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.sweep().run(cancel.clone()))
    }
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Option<PgPool>,
    pub broker: Arc<dyn MessageBroker>,
    pub batches: Arc<BatchOrchestrator>,
    pub assets: Arc<AssetUploadService>,
    pub uploads: UploadPool,
}

impl AppState {
    pub fn new(components: &Components, cancel: CancellationToken) -> Self {
        let assets = Arc::new(components.upload_service());
        let uploads = UploadPool::start(
            assets.clone(),
            components.config.upload_workers,
            components.config.upload_queue_capacity,
            cancel,
        );
        Self {
            db: components.db.clone(),
            broker: components.broker.clone(),
            batches: Arc::new(components.orchestrator()),
            assets,
            uploads,
        }
    }
}
