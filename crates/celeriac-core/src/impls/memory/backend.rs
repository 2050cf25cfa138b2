use std::sync::Arc;

use async_trait::async_trait;

use super::SCHEMES;
use super::connection::{MemoryChannel, MemoryConnection};
use super::hub::MemoryHub;
use crate::domain::{Message, TransportUri};
use crate::error::Result;
use crate::impls::results::{ChannelBackend, ChannelResultsProvider, ResultChannel};
use crate::ports::{Backend, BackendFactory, Clock, DeliveryStream, QueueSpec, SystemClock, TransportSettings};

/// Results travel as JSON messages on per-client reply queues of the hub.
pub type MemoryBackend = ChannelBackend<MemoryConnection>;

pub type MemoryResultsProvider = ChannelResultsProvider<MemoryConnection>;

impl ChannelBackend<MemoryConnection> {
    pub fn connect(hub: &MemoryHub, settings: &TransportSettings) -> Result<Self> {
        Self::connect_with_clock(hub, settings, Arc::new(SystemClock))
    }

    pub fn connect_with_clock(
        hub: &MemoryHub,
        settings: &TransportSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self::new(MemoryConnection::open(hub)?, settings, clock))
    }
}

#[async_trait]
impl ResultChannel for MemoryChannel {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()> {
        self.declare(spec)
    }

    async fn publish_result(&self, queue: &str, message: Message) -> Result<()> {
        self.publish(queue, message)
    }

    async fn subscribe(self, queue: &str, prefetch: u16) -> Result<Box<dyn DeliveryStream>> {
        Ok(Box::new(self.consume(queue, prefetch)?))
    }
}

pub struct MemoryBackendFactory {
    hub: MemoryHub,
}

impl MemoryBackendFactory {
    pub fn new(hub: MemoryHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl BackendFactory for MemoryBackendFactory {
    fn schemes(&self) -> &[&'static str] {
        SCHEMES
    }

    async fn create_backend(
        &self,
        _uri: &TransportUri,
        settings: &TransportSettings,
    ) -> Result<Arc<dyn Backend>> {
        Ok(Arc::new(MemoryBackend::connect(&self.hub, settings)?))
    }
}
