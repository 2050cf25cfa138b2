//! Deliveries handed to consumers, together with their settlement handle.

use async_trait::async_trait;

use crate::domain::Message;
use crate::error::Result;

/// Settles one delivery on the channel it arrived on.
///
/// Implementations requeue the message when dropped unsettled, the same way
/// a broker requeues unacknowledged deliveries when their channel closes.
#[async_trait]
pub trait Acker: Send {
    async fn ack(self: Box<Self>) -> Result<()>;

    async fn nack(self: Box<Self>, requeue: bool) -> Result<()>;
}

pub struct Delivery {
    pub message: Message,
    pub delivery_tag: u64,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(message: Message, delivery_tag: u64, acker: Box<dyn Acker>) -> Self {
        Self {
            message,
            delivery_tag,
            acker,
        }
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }

    /// Splits the message from its settlement handle.
    pub fn into_parts(self) -> (Message, u64, Box<dyn Acker>) {
        (self.message, self.delivery_tag, self.acker)
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("task_id", &self.message.task_id())
            .finish_non_exhaustive()
    }
}

/// A consumer subscription. `None` means the subscription has ended.
#[async_trait]
pub trait DeliveryStream: Send {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>>;
}
