use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::models::OperationKind;
use crate::services::broker::NotificationTopic;

/// Process-wide pipeline metrics.
///
/// Built once at startup and handed to every component that reports; the
/// values go through the `metrics` facade to whichever recorder is
/// installed (Prometheus in the binaries, none in tests).
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    in_flight: AtomicI64,
}

impl PipelineMetrics {
    /// Describe every metric and return the shared handle.
    pub fn register() -> Arc<Self> {
        metrics::describe_counter!("batch_requests_total", "Batch requests received");
        metrics::describe_counter!("batch_completed_total", "Batches completed and promoted");
        metrics::describe_counter!("batch_failed_total", "Batches that ended in error");
        metrics::describe_gauge!("batch_queue_depth", "Batches currently being processed");
        metrics::describe_histogram!(
            "batch_processing_seconds",
            "Wall time from batch submission to final status"
        );
        metrics::describe_counter!("pipeline_stages_total", "Pipeline stages by kind and outcome");
        metrics::describe_counter!("notifications_published_total", "Completion notifications published");
        metrics::describe_counter!(
            "notifications_dead_lettered_total",
            "Notifications moved to a dead-letter queue"
        );
        metrics::describe_counter!("notifications_consumed_total", "Notifications handled by consumers");
        metrics::describe_counter!("sweep_promotions_total", "Retry sweep promotion attempts by outcome");
        metrics::describe_counter!("asset_uploads_total", "Asset uploads by outcome");
        Arc::new(Self::default())
    }

    pub fn batch_started(&self) {
        metrics::counter!("batch_requests_total").increment(1);
        let depth = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!("batch_queue_depth").set(depth as f64);
    }

    pub fn batch_finished(&self, succeeded: bool, elapsed: Duration) {
        if succeeded {
            metrics::counter!("batch_completed_total").increment(1);
        } else {
            metrics::counter!("batch_failed_total").increment(1);
        }
        metrics::histogram!("batch_processing_seconds").record(elapsed.as_secs_f64());
        let depth = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::gauge!("batch_queue_depth").set(depth.max(0) as f64);
    }

    /// Batches currently between `batch_started` and `batch_finished`.
    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn stage(&self, kind: OperationKind, succeeded: bool) {
        let outcome = if succeeded { "completed" } else { "error" };
        metrics::counter!("pipeline_stages_total", "kind" => kind.to_string(), "outcome" => outcome)
            .increment(1);
    }

    pub fn notification_published(&self, topic: NotificationTopic) {
        metrics::counter!("notifications_published_total", "topic" => topic.to_string()).increment(1);
    }

    pub fn notification_consumed(&self, topic: NotificationTopic, outcome: &'static str) {
        metrics::counter!("notifications_consumed_total", "topic" => topic.to_string(), "outcome" => outcome)
            .increment(1);
    }

    pub fn notification_dead_lettered(&self, topic: NotificationTopic) {
        metrics::counter!("notifications_dead_lettered_total", "topic" => topic.to_string()).increment(1);
    }

    pub fn sweep_promotion(&self, outcome: &'static str) {
        metrics::counter!("sweep_promotions_total", "outcome" => outcome).increment(1);
    }

    pub fn asset_upload(&self, outcome: &'static str) {
        metrics::counter!("asset_uploads_total", "outcome" => outcome).increment(1);
    }
}
