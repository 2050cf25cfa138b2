//! In-process transport (`memory://`).
//!
//! Every broker and backend created from the same [`MemoryHub`] sees the same
//! queues, so a client and a worker group in one process can talk to each
//! other. Used by the demo binary and the end-to-end tests.

mod backend;
mod broker;
mod connection;
mod hub;

use std::sync::Arc;

pub use self::backend::{MemoryBackend, MemoryBackendFactory, MemoryResultsProvider};
pub use self::broker::{MemoryBroker, MemoryBrokerFactory};
pub use self::connection::{MemoryChannel, MemoryConnection, MemoryConsumer};
pub use self::hub::{DeadLetter, MemoryHub, QueueStats};

use crate::error::RegistryError;
use crate::ports::TransportRegistry;

pub const SCHEMES: &[&str] = &["memory"];

impl MemoryHub {
    /// Registers `memory://` broker and backend factories backed by this hub.
    pub fn register(&self, registry: &mut TransportRegistry) -> Result<(), RegistryError> {
        registry.register_broker(Arc::new(MemoryBrokerFactory::new(self.clone())))?;
        registry.register_backend(Arc::new(MemoryBackendFactory::new(self.clone())))?;
        Ok(())
    }
}
