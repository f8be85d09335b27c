//! Per-topic notification consumers.
//!
//! Each topic gets its own consumer task. A consumer runs its handler
//! under [`run_with_retry`]; a message that still fails afterwards, or
//! fails in a way retrying cannot fix, is moved unchanged to the topic's
//! dead-letter queue. Failures stop at the DLQ and the logs.

use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::{Repository, RepositoryError};
use crate::models::{BatchJob, LifecycleStatus, MediaAsset, OperationRecord, Record};
use crate::services::broker::{Message, MessageBroker, NotificationTopic};
use crate::services::retry::{run_with_retry, RetryOutcome, RetryPolicy, Transient};
use crate::services::telemetry::PipelineMetrics;

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("malformed payload '{0}'")]
    MalformedPayload(String),

    #[error("{kind} {id} not found")]
    MissingRecord { kind: &'static str, id: Uuid },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl Transient for ConsumerError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Repository(_))
    }
}

#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), ConsumerError>;
}

fn parse_id(message: &Message) -> Result<Uuid, ConsumerError> {
    Uuid::parse_str(message.body.trim())
        .map_err(|_| ConsumerError::MalformedPayload(message.body.clone()))
}

/// Loads the notified record and checks it against the status hint.
pub struct RecordReconciler<R: Record> {
    topic: NotificationTopic,
    records: Arc<dyn Repository<R>>,
}

impl<R: Record> RecordReconciler<R> {
    pub fn new(topic: NotificationTopic, records: Arc<dyn Repository<R>>) -> Self {
        Self { topic, records }
    }
}

#[async_trait]
impl<R: Record> NotificationHandler for RecordReconciler<R> {
    async fn handle(&self, message: &Message) -> Result<(), ConsumerError> {
        let id = parse_id(message)?;
        let record = self
            .records
            .find_by_id(id)
            .await?
            .ok_or(ConsumerError::MissingRecord { kind: R::KIND, id })?;

        let hinted = message
            .status_hint
            .as_deref()
            .and_then(|s| LifecycleStatus::from_str(s).ok());
        match hinted {
            Some(hint) if hint != record.status() && !record.status().is_terminal() => warn!(
                topic = %self.topic,
                id = %id,
                hinted = %hint,
                stored = %record.status(),
                "Stored status lags behind notification"
            ),
            _ => info!(
                topic = %self.topic,
                id = %id,
                status = %record.status(),
                retry_count = record.retry_count(),
                "{} status reconciled",
                R::KIND
            ),
        }
        Ok(())
    }
}

/// User status changes are owned by the account service; this consumer
/// only acknowledges well-formed notifications.
pub struct UserStatusHandler;

#[async_trait]
impl NotificationHandler for UserStatusHandler {
    async fn handle(&self, message: &Message) -> Result<(), ConsumerError> {
        let id = parse_id(message)?;
        info!(user_id = %id, status = ?message.status_hint, "User status notification received");
        Ok(())
    }
}

/// Handler wiring for every topic.
pub fn handler_for(
    topic: NotificationTopic,
    assets: Arc<dyn Repository<MediaAsset>>,
    operations: Arc<dyn Repository<OperationRecord>>,
    batches: Arc<dyn Repository<BatchJob>>,
) -> Arc<dyn NotificationHandler> {
    match topic {
        NotificationTopic::Upload => Arc::new(RecordReconciler::new(topic, assets)),
        NotificationTopic::Cut
        | NotificationTopic::Resize
        | NotificationTopic::Convert
        | NotificationTopic::Overlay => Arc::new(RecordReconciler::new(topic, operations)),
        NotificationTopic::Batch => Arc::new(RecordReconciler::new(topic, batches)),
        NotificationTopic::UserStatus => Arc::new(UserStatusHandler),
    }
}

/// What happened to one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Handled { attempts: u32 },
    DeadLettered { attempts: u32 },
    /// Shutdown interrupted the retries; the message went back on its queue.
    Requeued { attempts: u32 },
}

pub struct NotificationConsumer {
    topic: NotificationTopic,
    broker: Arc<dyn MessageBroker>,
    handler: Arc<dyn NotificationHandler>,
    policy: RetryPolicy,
    poll_interval: Duration,
    metrics: Arc<PipelineMetrics>,
    cancel: CancellationToken,
}

impl NotificationConsumer {
    pub fn new(
        topic: NotificationTopic,
        broker: Arc<dyn MessageBroker>,
        handler: Arc<dyn NotificationHandler>,
        policy: RetryPolicy,
        poll_interval: Duration,
        metrics: Arc<PipelineMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            topic,
            broker,
            handler,
            policy,
            poll_interval,
            metrics,
            cancel,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Poll the topic until cancelled.
    pub async fn run(self) {
        info!(topic = %self.topic, "Notification consumer started");
        while !self.cancel.is_cancelled() {
            match self.broker.receive(self.topic).await {
                Ok(Some(message)) => {
                    self.process(&message).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!(topic = %self.topic, error = %e, "Failed to poll notification queue"),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!(topic = %self.topic, "Notification consumer stopped");
    }

    /// Handle one delivered message.
    pub async fn process(&self, message: &Message) -> ConsumeOutcome {
        let handler = &self.handler;
        let outcome = run_with_retry(self.policy, &self.cancel, |_| handler.handle(message)).await;

        match outcome {
            RetryOutcome::Succeeded { attempts, .. } => {
                self.metrics.notification_consumed(self.topic, "handled");
                debug!(topic = %self.topic, attempts, "Notification handled");
                ConsumeOutcome::Handled { attempts }
            }
            RetryOutcome::Exhausted { attempts, error } | RetryOutcome::Aborted { attempts, error } => {
                error!(
                    topic = %self.topic,
                    payload = %message.body,
                    attempts,
                    error = %error,
                    "Giving up on notification, moving it to the dead-letter queue"
                );
                match self.broker.dead_letter(self.topic, message).await {
                    Ok(()) => self.metrics.notification_dead_lettered(self.topic),
                    Err(e) => {
                        error!(topic = %self.topic, error = %e, "Failed to dead-letter notification")
                    }
                }
                self.metrics.notification_consumed(self.topic, "dead_lettered");
                ConsumeOutcome::DeadLettered { attempts }
            }
            RetryOutcome::Interrupted { attempts, error } => {
                warn!(
                    topic = %self.topic,
                    attempts,
                    error = %error,
                    "Retry interrupted by shutdown, requeueing notification"
                );
                if let Err(e) = self.broker.publish(self.topic, message).await {
                    error!(topic = %self.topic, error = %e, "Failed to requeue notification");
                }
                ConsumeOutcome::Requeued { attempts }
            }
        }
    }
}
