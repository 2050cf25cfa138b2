use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::SCHEMES;
use super::connection::{AmqpConnection, PERSISTENT};
use crate::domain::{Message, TransportUri};
use crate::error::Result;
use crate::ports::{Broker, BrokerFactory, DeliveryStream, QueueSpec, TransportSettings};
use crate::resource::{ChannelPool, ChannelSource, reaper_period};

/// Task messages over a RabbitMQ connection; one channel per thread.
pub struct AmqpBroker {
    pool: Arc<ChannelPool<AmqpConnection>>,
    reaper: JoinHandle<()>,
}

impl AmqpBroker {
    pub async fn connect(uri: &TransportUri, settings: &TransportSettings) -> Result<Self> {
        let connection = AmqpConnection::open(uri).await?;
        let pool = Arc::new(ChannelPool::new(connection, settings.channel_idle));
        let reaper = pool.spawn_reaper(reaper_period(settings.channel_idle));
        Ok(Self { pool, reaper })
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_queue(&self, name: &str) -> Result<()> {
        let channel = self.pool.get_channel().await?;
        channel.declare(&QueueSpec::task_queue(name)).await
    }

    async fn send(&self, message: &Message, queue: &str) -> Result<()> {
        let channel = self.pool.get_channel().await?;
        channel.publish(queue, message, PERSISTENT).await
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Box<dyn DeliveryStream>> {
        let channel = self.pool.source().open_channel().await?;
        Ok(Box::new(channel.consume(queue, prefetch).await?))
    }

    async fn close(&self) -> Result<()> {
        self.reaper.abort();
        self.pool.close().await
    }
}

#[derive(Debug, Default)]
pub struct AmqpBrokerFactory;

#[async_trait]
impl BrokerFactory for AmqpBrokerFactory {
    fn schemes(&self) -> &[&'static str] {
        SCHEMES
    }

    async fn create_broker(
        &self,
        uri: &TransportUri,
        settings: &TransportSettings,
    ) -> Result<Arc<dyn Broker>> {
        Ok(Arc::new(AmqpBroker::connect(uri, settings).await?))
    }
}
