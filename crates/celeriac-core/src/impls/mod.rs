//! Transport implementations of the broker and backend ports.
//!
//! - **memory**: in-process queues, always available
//! - **amqp**: RabbitMQ via lapin, behind the `amqp` feature
//! - **results**: the reply-queue backend both of them share

pub mod memory;
pub mod results;

#[cfg(feature = "amqp")]
pub mod amqp;

use crate::error::RegistryError;
use crate::ports::TransportRegistry;

use self::memory::MemoryHub;

/// Registry with every transport compiled into this build. `memory://`
/// resolves to `hub`.
pub fn default_transports(hub: &MemoryHub) -> Result<TransportRegistry, RegistryError> {
    let mut registry = TransportRegistry::new();
    hub.register(&mut registry)?;
    #[cfg(feature = "amqp")]
    amqp::register(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_is_always_registered() {
        let registry = default_transports(&MemoryHub::new()).unwrap();
        assert!(registry.broker_schemes().contains(&"memory".to_string()));
        assert!(registry.backend_schemes().contains(&"memory".to_string()));
    }

    #[cfg(feature = "amqp")]
    #[test]
    fn amqp_schemes_are_registered_with_the_feature() {
        let registry = default_transports(&MemoryHub::new()).unwrap();
        assert!(registry.broker_schemes().contains(&"amqps".to_string()));
    }
}
