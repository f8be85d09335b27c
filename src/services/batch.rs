use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::Repository;
use crate::error::MediaError;
use crate::models::{BatchJob, BatchRequest, LifecycleStatus, MediaAsset};
use crate::services::broker::NotificationTopic;
use crate::services::lifecycle::{StatusLifecycle, Transition};
use crate::services::notifier::Notifier;
use crate::services::pipeline::{remove_scratch_files, PipelineExecutor};
use crate::services::storage::BlobStore;
use crate::services::telemetry::PipelineMetrics;
use crate::services::validation::OperationValidator;

/// Runs one batch request end to end: validate, execute, promote, record.
pub struct BatchOrchestrator {
    assets: Arc<dyn Repository<MediaAsset>>,
    batches: Arc<dyn Repository<BatchJob>>,
    validator: OperationValidator,
    executor: PipelineExecutor,
    storage: Arc<dyn BlobStore>,
    lifecycle: StatusLifecycle,
    notifier: Notifier,
    metrics: Arc<PipelineMetrics>,
    scratch_dir: PathBuf,
}

impl BatchOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        assets: Arc<dyn Repository<MediaAsset>>,
        batches: Arc<dyn Repository<BatchJob>>,
        validator: OperationValidator,
        executor: PipelineExecutor,
        storage: Arc<dyn BlobStore>,
        lifecycle: StatusLifecycle,
        notifier: Notifier,
        metrics: Arc<PipelineMetrics>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            assets,
            batches,
            validator,
            executor,
            storage,
            lifecycle,
            notifier,
            metrics,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Submit and synchronously process a batch.
    ///
    /// Validation and missing-asset errors are returned before anything is
    /// persisted. Later failures are returned as
    /// [`MediaError::BatchFailed`] once the batch status is durable.
    pub async fn submit(&self, request: &BatchRequest) -> Result<BatchJob, MediaError> {
        let started = Instant::now();
        self.metrics.batch_started();
        let result = self.run(request).await;
        self.metrics.batch_finished(result.is_ok(), started.elapsed());
        result
    }

    pub async fn get(&self, batch_id: Uuid) -> Result<BatchJob, MediaError> {
        self.batches
            .find_by_id(batch_id)
            .await?
            .ok_or(MediaError::MissingResource {
                kind: "batch",
                id: batch_id,
            })
    }

    async fn run(&self, request: &BatchRequest) -> Result<BatchJob, MediaError> {
        let asset = self
            .assets
            .find_by_id(request.asset_id)
            .await?
            .ok_or(MediaError::MissingResource {
                kind: "asset",
                id: request.asset_id,
            })?;

        let operations = self.validator.validate_chain(&asset, &request.operations)?;

        let batch = BatchJob::new(asset.id, operations);
        self.batches.save(&batch).await?;
        info!(
            batch_id = %batch.id,
            asset_id = %asset.id,
            steps = ?batch.processing_steps,
            "Batch created"
        );

        match self.process(&batch, &asset).await {
            Ok(artifact_url) => {
                let done = self
                    .lifecycle
                    .transition_with(&*self.batches, batch.id, Transition::Complete, |b| {
                        b.artifact_url = Some(artifact_url.clone());
                        b.error = None;
                    })
                    .await?;
                self.notifier
                    .publish(NotificationTopic::Batch, batch.id, Some(LifecycleStatus::Completed))
                    .await;

                info!(batch_id = %batch.id, artifact = %artifact_url, "Batch completed");
                Ok(done.record)
            }
            Err(error) => {
                let message = error.to_string();
                let failed = self
                    .lifecycle
                    .transition_with(&*self.batches, batch.id, Transition::Fail, |b| {
                        b.artifact_url = None;
                        b.error = Some(message.clone());
                    })
                    .await?;
                let status = failed.record.status;
                self.notifier
                    .publish(NotificationTopic::Batch, batch.id, Some(status))
                    .await;

                warn!(batch_id = %batch.id, status = %status, error = %error, "Batch failed");
                Err(MediaError::BatchFailed {
                    batch_id: batch.id,
                    status,
                    source: Box::new(error),
                })
            }
        }
    }

    /// Execute the chain and promote its result; returns the durable URL.
    async fn process(&self, batch: &BatchJob, asset: &MediaAsset) -> Result<String, MediaError> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;

        let (source, downloaded) = self.resolve_source(batch.id, asset).await?;
        let result = self
            .executor
            .execute(batch.id, asset, &source, &batch.operations)
            .await;
        if downloaded {
            remove_scratch_files(&[source]).await;
        }
        let output = result?;

        let artifact = self
            .scratch_dir
            .join(format!("batch_{}_processed.{}", batch.id, output.final_format));
        if let Err(e) = tokio::fs::rename(&output.final_path, &artifact).await {
            remove_scratch_files(&[output.final_path]).await;
            return Err(e.into());
        }

        let logical_name = format!("batches/{}_processed.{}", batch.id, output.final_format);
        let uploaded = self.storage.upload(&artifact, &logical_name).await;
        remove_scratch_files(&[artifact]).await;
        Ok(uploaded?)
    }

    /// Local copy of the asset, downloading it into scratch space when the
    /// upload copy is gone. The flag says whether the file is a download.
    async fn resolve_source(&self, batch_id: Uuid, asset: &MediaAsset) -> Result<(PathBuf, bool), MediaError> {
        let local = PathBuf::from(&asset.local_path);
        if tokio::fs::try_exists(&local).await.unwrap_or(false) {
            return Ok((local, false));
        }

        let Some(url) = asset.storage_url.as_deref() else {
            return Err(MediaError::MissingResource {
                kind: "asset file",
                id: asset.id,
            });
        };
        let target = self
            .scratch_dir
            .join(format!("{batch_id}_source.{}", asset.format));
        info!(asset_id = %asset.id, url = %url, "Fetching source asset from storage");
        self.storage.download(url, &target).await?;
        Ok((target, true))
    }
}
