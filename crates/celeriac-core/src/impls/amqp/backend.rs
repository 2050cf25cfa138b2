use std::sync::Arc;

use async_trait::async_trait;

use super::SCHEMES;
use super::connection::{AmqpChannel, AmqpConnection, TRANSIENT};
use crate::domain::{Message, TransportUri};
use crate::error::Result;
use crate::impls::results::{ChannelBackend, ChannelResultsProvider, ResultChannel};
use crate::ports::{Backend, BackendFactory, DeliveryStream, QueueSpec, SystemClock, TransportSettings};

/// Results are published non-persistent to the client's reply queue.
pub type AmqpBackend = ChannelBackend<AmqpConnection>;

pub type AmqpResultsProvider = ChannelResultsProvider<AmqpConnection>;

impl ChannelBackend<AmqpConnection> {
    pub async fn connect(uri: &TransportUri, settings: &TransportSettings) -> Result<Self> {
        let connection = AmqpConnection::open(uri).await?;
        Ok(Self::new(connection, settings, Arc::new(SystemClock)))
    }
}

#[async_trait]
impl ResultChannel for AmqpChannel {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()> {
        self.declare(spec).await
    }

    async fn publish_result(&self, queue: &str, message: Message) -> Result<()> {
        self.publish(queue, &message, TRANSIENT).await
    }

    async fn subscribe(self, queue: &str, prefetch: u16) -> Result<Box<dyn DeliveryStream>> {
        Ok(Box::new(self.consume(queue, prefetch).await?))
    }
}

#[derive(Debug, Default)]
pub struct AmqpBackendFactory;

#[async_trait]
impl BackendFactory for AmqpBackendFactory {
    fn schemes(&self) -> &[&'static str] {
        SCHEMES
    }

    async fn create_backend(
        &self,
        uri: &TransportUri,
        settings: &TransportSettings,
    ) -> Result<Arc<dyn Backend>> {
        Ok(Arc::new(AmqpBackend::connect(uri, settings).await?))
    }
}
