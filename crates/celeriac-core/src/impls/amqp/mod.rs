//! RabbitMQ transport (`amqp://`, `amqps://`), built on lapin.
//!
//! Task queues are durable and task messages persistent. Results go to a
//! per-client reply queue which RabbitMQ deletes a day after its last
//! consumer disappears.

mod backend;
mod broker;
mod connection;

use std::sync::Arc;

pub use self::backend::{AmqpBackend, AmqpBackendFactory, AmqpResultsProvider};
pub use self::broker::{AmqpBroker, AmqpBrokerFactory};
pub use self::connection::{AmqpChannel, AmqpConnection, AmqpConsumer};

use crate::error::RegistryError;
use crate::ports::TransportRegistry;

pub const SCHEMES: &[&str] = &["amqp", "amqps"];

/// Registers the RabbitMQ broker and backend factories.
pub fn register(registry: &mut TransportRegistry) -> Result<(), RegistryError> {
    registry.register_broker(Arc::new(AmqpBrokerFactory))?;
    registry.register_backend(Arc::new(AmqpBackendFactory))?;
    Ok(())
}
