//! Sequential execution of a validated operation chain.
//!
//! Each stage reads the previous stage's output (the source file for the
//! first stage). Every stage gets an `OperationRecord`: saved in
//! `Processing` before the engine runs, then moved to `Completed` or
//! `Error` through the lifecycle manager. The first failing stage stops the
//! chain; nothing is retried here.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{Repository, RepositoryError};
use crate::models::{LifecycleStatus, MediaAsset, OperationKind, OperationRecord, OperationSpec};
use crate::services::broker::NotificationTopic;
use crate::services::engine::{EngineError, TransformEngine, TransformRequest};
use crate::services::lifecycle::{LifecycleError, StatusLifecycle, Transition};
use crate::services::notifier::Notifier;
use crate::services::telemetry::PipelineMetrics;

/// What one successful stage did.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub index: usize,
    pub kind: OperationKind,
    pub record_id: Uuid,
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Result of a fully successful chain.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Output of the last stage; still in the scratch directory.
    pub final_path: PathBuf,
    /// Extension of `final_path`, i.e. the chain's resulting format.
    pub final_format: String,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("stage {index} ({kind}) failed: {source}")]
    Stage {
        index: usize,
        kind: OperationKind,
        record_id: Uuid,
        status: LifecycleStatus,
        source: EngineError,
    },

    #[error("operation chain is empty")]
    Empty,

    #[error("scratch directory unavailable: {0}")]
    Scratch(#[from] std::io::Error),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct PipelineExecutor {
    engine: Arc<dyn TransformEngine>,
    operations: Arc<dyn Repository<OperationRecord>>,
    lifecycle: StatusLifecycle,
    notifier: Notifier,
    metrics: Arc<PipelineMetrics>,
    scratch_dir: PathBuf,
}

impl PipelineExecutor {
    pub fn new(
        engine: Arc<dyn TransformEngine>,
        operations: Arc<dyn Repository<OperationRecord>>,
        lifecycle: StatusLifecycle,
        notifier: Notifier,
        metrics: Arc<PipelineMetrics>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            operations,
            lifecycle,
            notifier,
            metrics,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Run `operations` in order starting from `source`.
    ///
    /// On success only the final output remains in scratch space; on
    /// failure every file the chain produced has been removed.
    pub async fn execute(
        &self,
        batch_id: Uuid,
        asset: &MediaAsset,
        source: &Path,
        operations: &[OperationSpec],
    ) -> Result<PipelineOutput, PipelineError> {
        if operations.is_empty() {
            return Err(PipelineError::Empty);
        }
        tokio::fs::create_dir_all(&self.scratch_dir).await?;

        let mut produced = Vec::with_capacity(operations.len());
        match self
            .run_stages(batch_id, asset, source, operations, &mut produced)
            .await
        {
            Ok(stages) => {
                // Invariant: one produced file per successful stage.
                let final_path = match produced.pop() {
                    Some(path) => path,
                    None => return Err(PipelineError::Empty),
                };
                remove_scratch_files(&produced).await;

                let final_format = format_of(&final_path).unwrap_or_else(|| asset.format.clone());
                info!(
                    batch_id = %batch_id,
                    stages = stages.len(),
                    output = %final_path.display(),
                    "Pipeline completed"
                );
                Ok(PipelineOutput {
                    final_path,
                    final_format,
                    stages,
                })
            }
            Err(e) => {
                remove_scratch_files(&produced).await;
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        batch_id: Uuid,
        asset: &MediaAsset,
        source: &Path,
        operations: &[OperationSpec],
        produced: &mut Vec<PathBuf>,
    ) -> Result<Vec<StageReport>, PipelineError> {
        let mut stages = Vec::with_capacity(operations.len());
        let mut input = source.to_path_buf();
        let mut format = asset.format.clone();

        for (index, operation) in operations.iter().enumerate() {
            let kind = operation.kind();
            let extension = match operation {
                OperationSpec::Convert { target_format } => target_format.extension().to_string(),
                _ => format.clone(),
            };
            let request = TransformRequest {
                input: input.clone(),
                output: self
                    .scratch_dir
                    .join(format!("{batch_id}_{index}_{kind}.{extension}")),
                operation: operation.clone(),
            };

            let record = OperationRecord::start(
                asset.id,
                batch_id,
                operation,
                &request.input.to_string_lossy(),
            );
            self.operations.save(&record).await?;

            info!(batch_id = %batch_id, stage = index, kind = %kind, input = %input.display(), "Running stage");

            match self.invoke(&request).await {
                Ok(output) => {
                    produced.push(output.clone());
                    let output_text = output.to_string_lossy().to_string();
                    self.lifecycle
                        .transition_with(&*self.operations, record.id, Transition::Complete, |r| {
                            r.output_path = Some(output_text.clone());
                        })
                        .await?;
                    self.metrics.stage(kind, true);
                    self.notifier
                        .publish(kind.into(), record.id, Some(LifecycleStatus::Completed))
                        .await;

                    if let Some(next) = format_of(&output) {
                        format = next;
                    }
                    stages.push(StageReport {
                        index,
                        kind,
                        record_id: record.id,
                        input: std::mem::replace(&mut input, output.clone()),
                        output,
                    });
                }
                Err(error) => {
                    // A partial output of the failed stage is scratch too.
                    if tokio::fs::try_exists(&request.output).await.unwrap_or(false) {
                        produced.push(request.output.clone());
                    }

                    let message = error.to_string();
                    let failed = self
                        .lifecycle
                        .transition_with(&*self.operations, record.id, Transition::Fail, |r| {
                            r.error = Some(message.clone());
                        })
                        .await?;
                    self.metrics.stage(kind, false);
                    self.notifier
                        .publish(NotificationTopic::from(kind), record.id, Some(failed.record.status))
                        .await;

                    warn!(
                        batch_id = %batch_id,
                        stage = index,
                        kind = %kind,
                        error = %error,
                        "Stage failed, aborting remaining chain"
                    );
                    return Err(PipelineError::Stage {
                        index,
                        kind,
                        record_id: record.id,
                        status: failed.record.status,
                        source: error,
                    });
                }
            }
        }
        Ok(stages)
    }

    /// Engine call plus the output-exists check.
    async fn invoke(&self, request: &TransformRequest) -> Result<PathBuf, EngineError> {
        let output = self.engine.transform(request).await?;
        if tokio::fs::try_exists(&output).await.unwrap_or(false) {
            Ok(output)
        } else {
            Err(EngineError::MissingOutput(output))
        }
    }
}

/// Lower-case extension of `path`.
pub fn format_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Best-effort removal of scratch files; missing files are fine.
pub async fn remove_scratch_files(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove scratch file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_of() {
        assert_eq!(format_of(Path::new("/tmp/a/b.MP4")).as_deref(), Some("mp4"));
        assert_eq!(format_of(Path::new("/tmp/noext")), None);
    }

    #[tokio::test]
    async fn test_remove_scratch_files_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.mp4");
        tokio::fs::write(&present, b"x").await.unwrap();

        remove_scratch_files(&[present.clone(), dir.path().join("absent.mp4")]).await;
        assert!(!present.exists());
    }
}
