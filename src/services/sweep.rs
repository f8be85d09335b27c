//! Periodic re-promotion of assets left in `Error`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db::Repository;
use crate::error::MediaError;
use crate::models::{LifecycleStatus, MediaAsset};
use crate::services::broker::NotificationTopic;
use crate::services::lifecycle::{StatusLifecycle, Transition, TransitionOutcome};
use crate::services::notifier::Notifier;
use crate::services::storage::BlobStore;
use crate::services::telemetry::PipelineMetrics;

/// Counts from one sweep run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub promoted: usize,
    pub failed: usize,
    pub exhausted: usize,
    /// Records whose transition could not be applied this run.
    pub skipped: usize,
}

pub struct RetrySweepScheduler {
    assets: Arc<dyn Repository<MediaAsset>>,
    storage: Arc<dyn BlobStore>,
    lifecycle: StatusLifecycle,
    notifier: Notifier,
    metrics: Arc<PipelineMetrics>,
    interval: Duration,
}

impl RetrySweepScheduler {
    pub fn new(
        assets: Arc<dyn Repository<MediaAsset>>,
        storage: Arc<dyn BlobStore>,
        lifecycle: StatusLifecycle,
        notifier: Notifier,
        metrics: Arc<PipelineMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            assets,
            storage,
            lifecycle,
            notifier,
            metrics,
            interval,
        }
    }

    /// Sweep on a fixed interval until cancelled. Each sweep finishes
    /// before the next tick is taken, so runs never overlap.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Retry sweep started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.sweep_once().await {
                Ok(report) if report.examined > 0 => info!(?report, "Retry sweep finished"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Retry sweep failed"),
            }
        }
        info!("Retry sweep stopped");
    }

    /// One pass over every asset currently in `Error`. Only the initial
    /// query fails the run; a record that cannot be transitioned is logged,
    /// counted in `skipped`, and left for the next tick.
    pub async fn sweep_once(&self) -> Result<SweepReport, MediaError> {
        let candidates = self.assets.find_by_status(LifecycleStatus::Error).await?;
        let mut report = SweepReport {
            examined: candidates.len(),
            ..SweepReport::default()
        };

        for asset in candidates {
            if self.lifecycle.is_exhausted(&asset) {
                if let Err(e) = self
                    .lifecycle
                    .transition(&*self.assets, asset.id, Transition::ForceFail)
                    .await
                {
                    warn!(asset_id = %asset.id, error = %e, "Skipping asset, force-fail not applied");
                    report.skipped += 1;
                    continue;
                }
                self.metrics.sweep_promotion("exhausted");
                report.exhausted += 1;
                self.notifier
                    .publish(
                        NotificationTopic::Upload,
                        asset.id,
                        Some(LifecycleStatus::FailedPermanently),
                    )
                    .await;
                continue;
            }

            let result = match self
                .storage
                .upload(Path::new(&asset.local_path), &asset.storage_key())
                .await
            {
                Ok(url) => {
                    self.lifecycle
                        .transition_with(&*self.assets, asset.id, Transition::Complete, |a| {
                            a.storage_url = Some(url.clone());
                        })
                        .await
                }
                Err(e) => {
                    warn!(
                        asset_id = %asset.id,
                        retry_count = asset.retry_count,
                        error = %e,
                        "Re-promotion failed"
                    );
                    self.lifecycle
                        .transition(&*self.assets, asset.id, Transition::Fail)
                        .await
                }
            };
            let result = match result {
                Ok(result) => result,
                Err(e) => {
                    warn!(asset_id = %asset.id, error = %e, "Skipping asset, transition not applied");
                    report.skipped += 1;
                    continue;
                }
            };

            match result.outcome {
                TransitionOutcome::Completed => {
                    info!(asset_id = %asset.id, "Asset re-promoted");
                    self.metrics.sweep_promotion("promoted");
                    report.promoted += 1;
                }
                TransitionOutcome::Errored { .. } => {
                    self.metrics.sweep_promotion("failed");
                    report.failed += 1;
                }
                TransitionOutcome::Exhausted { .. } => {
                    self.metrics.sweep_promotion("exhausted");
                    report.exhausted += 1;
                }
                TransitionOutcome::Ignored { .. } => continue,
            }
            self.notifier
                .publish(NotificationTopic::Upload, asset.id, Some(result.record.status))
                .await;
        }

        Ok(report)
    }
}
