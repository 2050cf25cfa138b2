//! Broker port: carries task messages to workers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::delivery::DeliveryStream;
use crate::domain::{ClientId, Message, TransportUri};
use crate::error::Result;

/// Reply queues vanish after a day without consumers.
pub const REPLY_QUEUE_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Queue attributes. Re-declaring a queue with different attributes fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub expires: Option<Duration>,
}

impl QueueSpec {
    /// Durable, shared by every worker.
    pub fn task_queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            auto_delete: false,
            expires: None,
        }
    }

    /// Named by the client id; deleted with its last consumer.
    pub fn reply_queue(client_id: &ClientId) -> Self {
        Self {
            name: client_id.to_string(),
            durable: false,
            auto_delete: true,
            expires: Some(REPLY_QUEUE_EXPIRY),
        }
    }
}

/// Knobs shared by every transport implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// How long result futures are kept, from creation.
    pub result_ttl: Duration,
    /// Channels unused for this long are closed.
    pub channel_idle: Duration,
    /// Prefetch of the reply consumer.
    pub reply_prefetch: u16,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            result_ttl: Duration::from_secs(2 * 60 * 60),
            channel_idle: Duration::from_secs(10 * 60),
            reply_prefetch: 2,
        }
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Declares a durable task queue. Idempotent.
    async fn declare_queue(&self, name: &str) -> Result<()>;

    /// An empty JSON message to be filled in by the caller.
    fn new_message(&self) -> Message {
        Message::new()
    }

    /// Publishes a persistent message to `queue`.
    async fn send(&self, message: &Message, queue: &str) -> Result<()>;

    /// Subscribes to `queue` with at most `prefetch` unacknowledged deliveries.
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Box<dyn DeliveryStream>>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait BrokerFactory: Send + Sync {
    fn schemes(&self) -> &[&'static str];

    async fn create_broker(
        &self,
        uri: &TransportUri,
        settings: &TransportSettings,
    ) -> Result<Arc<dyn Broker>>;
}
