use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::SCHEMES;
use super::connection::MemoryConnection;
use super::hub::MemoryHub;
use crate::domain::{Message, TransportUri};
use crate::error::Result;
use crate::ports::{Broker, BrokerFactory, DeliveryStream, QueueSpec, TransportSettings};
use crate::resource::{ChannelPool, ChannelSource, reaper_period};

pub struct MemoryBroker {
    pool: Arc<ChannelPool<MemoryConnection>>,
    reaper: JoinHandle<()>,
}

impl MemoryBroker {
    pub fn connect(hub: &MemoryHub, settings: &TransportSettings) -> Result<Self> {
        let connection = MemoryConnection::open(hub)?;
        let pool = Arc::new(ChannelPool::new(connection, settings.channel_idle));
        let reaper = pool.spawn_reaper(reaper_period(settings.channel_idle));
        Ok(Self { pool, reaper })
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_queue(&self, name: &str) -> Result<()> {
        let channel = self.pool.get_channel().await?;
        channel.declare(&QueueSpec::task_queue(name))
    }

    async fn send(&self, message: &Message, queue: &str) -> Result<()> {
        let channel = self.pool.get_channel().await?;
        channel.publish(queue, message.clone())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Box<dyn DeliveryStream>> {
        // a consumer owns its channel; it is not pooled
        let channel = self.pool.source().open_channel().await?;
        Ok(Box::new(channel.consume(queue, prefetch)?))
    }

    async fn close(&self) -> Result<()> {
        self.reaper.abort();
        self.pool.close().await
    }
}

pub struct MemoryBrokerFactory {
    hub: MemoryHub,
}

impl MemoryBrokerFactory {
    pub fn new(hub: MemoryHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl BrokerFactory for MemoryBrokerFactory {
    fn schemes(&self) -> &[&'static str] {
        SCHEMES
    }

    async fn create_broker(
        &self,
        _uri: &TransportUri,
        settings: &TransportSettings,
    ) -> Result<Arc<dyn Broker>> {
        Ok(Arc::new(MemoryBroker::connect(&self.hub, settings)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;

    #[tokio::test]
    async fn sent_messages_reach_consumers() {
        let hub = MemoryHub::new();
        let broker = MemoryBroker::connect(&hub, &TransportSettings::default()).unwrap();
        broker.declare_queue("celery").await.unwrap();
        broker.declare_queue("celery").await.unwrap();

        let mut message = broker.new_message();
        message.headers.id = Some(TaskId::new("t-1"));
        broker.send(&message, "celery").await.unwrap();

        let mut stream = broker.consume("celery", 2).await.unwrap();
        let delivery = stream.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.message, message);
        assert_eq!(delivery.message.content_type, "application/json");
        delivery.ack().await.unwrap();
        assert_eq!(hub.stats("celery").unwrap().unacked, 0);
    }

    #[tokio::test]
    async fn closed_broker_refuses_work() {
        let hub = MemoryHub::new();
        let broker = MemoryBroker::connect(&hub, &TransportSettings::default()).unwrap();
        broker.declare_queue("celery").await.unwrap();
        broker.close().await.unwrap();

        assert!(broker.send(&Message::new(), "celery").await.is_err());
        assert!(broker.consume("celery", 1).await.is_err());
    }

    #[tokio::test]
    async fn consuming_a_missing_queue_fails() {
        let hub = MemoryHub::new();
        let broker = MemoryBroker::connect(&hub, &TransportSettings::default()).unwrap();
        let err = broker.consume("ghost", 1).await.err().unwrap();
        assert!(err.to_string().contains("NOT_FOUND"));
    }
}
