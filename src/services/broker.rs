use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use strum::{Display, EnumIter, EnumString};
use tokio::sync::Mutex;

use crate::models::OperationKind;

const KEY_PREFIX: &str = "media_batch";

/// Completion topics; each has a work queue and a dead-letter queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, EnumIter, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum NotificationTopic {
    Upload,
    Cut,
    Resize,
    Convert,
    Overlay,
    Batch,
    UserStatus,
}

impl From<OperationKind> for NotificationTopic {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Cut => Self::Cut,
            OperationKind::Resize => Self::Resize,
            OperationKind::Convert => Self::Convert,
            OperationKind::Overlay => Self::Overlay,
        }
    }
}

impl NotificationTopic {
    pub fn queue_key(self) -> String {
        format!("{KEY_PREFIX}:{self}")
    }

    pub fn dead_letter_key(self) -> String {
        format!("{KEY_PREFIX}:{self}:dlq")
    }
}

/// A completion token: the record id plus an optional status hint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_hint: Option<String>,
}

impl Message {
    pub fn new(body: impl Into<String>, status_hint: Option<String>) -> Self {
        Self {
            body: body.into(),
            status_hint,
        }
    }

    /// Decode a queued payload. Anything that is not an envelope is kept
    /// verbatim as the body so it can still be dead-lettered unchanged.
    pub fn decode(payload: &str) -> Self {
        serde_json::from_str(payload).unwrap_or_else(|_| Self::new(payload, None))
    }

    pub fn encode(&self) -> Result<String, BrokerError> {
        serde_json::to_string(self).map_err(BrokerError::Serialize)
    }
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, topic: NotificationTopic, message: &Message) -> Result<(), BrokerError>;

    /// Pop the oldest message for `topic`, if any.
    async fn receive(&self, topic: NotificationTopic) -> Result<Option<Message>, BrokerError>;

    async fn dead_letter(&self, topic: NotificationTopic, message: &Message) -> Result<(), BrokerError>;

    /// Pending messages on the topic's work queue.
    async fn depth(&self, topic: NotificationTopic) -> Result<u64, BrokerError>;

    async fn health_check(&self) -> Result<(), BrokerError>;
}

/// Redis-backed broker: one list per queue, LPUSH to publish, RPOP to take.
pub struct RedisBroker {
    client: redis::Client,
}

impl RedisBroker {
    pub fn new(redis_url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url).map_err(BrokerError::Redis)?;
        Ok(Self { client })
    }

    async fn push(&self, key: &str, message: &Message) -> Result<(), BrokerError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = message.encode()?;
        conn.lpush::<_, _, ()>(key, &payload).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for RedisBroker {
    async fn publish(&self, topic: NotificationTopic, message: &Message) -> Result<(), BrokerError> {
        self.push(&topic.queue_key(), message).await
    }

    async fn receive(&self, topic: NotificationTopic) -> Result<Option<Message>, BrokerError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.rpop(topic.queue_key(), None).await?;
        Ok(payload.as_deref().map(Message::decode))
    }

    async fn dead_letter(&self, topic: NotificationTopic, message: &Message) -> Result<(), BrokerError> {
        self.push(&topic.dead_letter_key(), message).await
    }

    async fn depth(&self, topic: NotificationTopic) -> Result<u64, BrokerError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.llen(topic.queue_key()).await?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// In-process broker for standalone mode and tests.
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, VecDeque<Message>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently parked on the topic's dead-letter queue.
    pub async fn dead_letters(&self, topic: NotificationTopic) -> Vec<Message> {
        self.queues
            .lock()
            .await
            .get(&topic.dead_letter_key())
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages waiting on the topic's work queue, oldest first.
    pub async fn pending(&self, topic: NotificationTopic) -> Vec<Message> {
        self.queues
            .lock()
            .await
            .get(&topic.queue_key())
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn publish(&self, topic: NotificationTopic, message: &Message) -> Result<(), BrokerError> {
        self.queues
            .lock()
            .await
            .entry(topic.queue_key())
            .or_default()
            .push_back(message.clone());
        Ok(())
    }

    async fn receive(&self, topic: NotificationTopic) -> Result<Option<Message>, BrokerError> {
        Ok(self
            .queues
            .lock()
            .await
            .get_mut(&topic.queue_key())
            .and_then(VecDeque::pop_front))
    }

    async fn dead_letter(&self, topic: NotificationTopic, message: &Message) -> Result<(), BrokerError> {
        self.queues
            .lock()
            .await
            .entry(topic.dead_letter_key())
            .or_default()
            .push_back(message.clone());
        Ok(())
    }

    async fn depth(&self, topic: NotificationTopic) -> Result<u64, BrokerError> {
        Ok(self
            .queues
            .lock()
            .await
            .get(&topic.queue_key())
            .map_or(0, |q| q.len() as u64))
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
