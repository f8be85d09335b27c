use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::models::LifecycleStatus;
use crate::services::broker::{Message, MessageBroker, NotificationTopic};
use crate::services::telemetry::PipelineMetrics;

/// Producer side of completion notifications.
///
/// Publishing happens after the record's status is durable. A broker
/// failure here is logged and the notification dropped; only consumers
/// retry.
#[derive(Clone)]
pub struct Notifier {
    broker: Arc<dyn MessageBroker>,
    metrics: Arc<PipelineMetrics>,
}

impl Notifier {
    pub fn new(broker: Arc<dyn MessageBroker>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { broker, metrics }
    }

    pub async fn publish(&self, topic: NotificationTopic, id: Uuid, status: Option<LifecycleStatus>) {
        let message = Message::new(id.to_string(), status.map(|s| s.to_string()));
        match self.broker.publish(topic, &message).await {
            Ok(()) => {
                self.metrics.notification_published(topic);
                debug!(topic = %topic, id = %id, "Published completion notification");
            }
            Err(e) => {
                error!(topic = %topic, id = %id, error = %e, "Failed to publish notification, dropping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::broker::{BrokerError, MemoryBroker};
    use async_trait::async_trait;

    struct DownBroker;

    #[async_trait]
    impl MessageBroker for DownBroker {
        async fn publish(&self, _: NotificationTopic, _: &Message) -> Result<(), BrokerError> {
            Err(BrokerError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))))
        }
        async fn receive(&self, _: NotificationTopic) -> Result<Option<Message>, BrokerError> {
            Ok(None)
        }
        async fn dead_letter(&self, _: NotificationTopic, _: &Message) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn depth(&self, _: NotificationTopic) -> Result<u64, BrokerError> {
            Ok(0)
        }
        async fn health_check(&self) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_carries_id_and_hint() {
        let broker = Arc::new(MemoryBroker::new());
        let notifier = Notifier::new(broker.clone(), PipelineMetrics::register());
        let id = Uuid::new_v4();

        notifier
            .publish(NotificationTopic::Batch, id, Some(LifecycleStatus::Completed))
            .await;

        let pending = broker.pending(NotificationTopic::Batch).await;
        assert_eq!(pending, vec![Message::new(id.to_string(), Some("completed".into()))]);
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let notifier = Notifier::new(Arc::new(DownBroker), PipelineMetrics::register());
        notifier.publish(NotificationTopic::Upload, Uuid::new_v4(), None).await;
    }
}
