//! Selection of broker/backend implementations by URI scheme.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::backend::{Backend, BackendFactory};
use super::broker::{Broker, BrokerFactory, TransportSettings};
use crate::domain::TransportUri;
use crate::error::{CeleriacError, RegistryError, Result};

/// Registered transport factories, keyed by scheme.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    brokers: HashMap<String, Arc<dyn BrokerFactory>>,
    backends: HashMap<String, Arc<dyn BackendFactory>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_broker(
        &mut self,
        factory: Arc<dyn BrokerFactory>,
    ) -> std::result::Result<(), RegistryError> {
        register(&mut self.brokers, factory.schemes(), factory.clone())
    }

    pub fn register_backend(
        &mut self,
        factory: Arc<dyn BackendFactory>,
    ) -> std::result::Result<(), RegistryError> {
        register(&mut self.backends, factory.schemes(), factory.clone())
    }

    pub fn broker_factory(&self, uri: &TransportUri) -> Result<Arc<dyn BrokerFactory>> {
        lookup(&self.brokers, uri)
    }

    pub fn backend_factory(&self, uri: &TransportUri) -> Result<Arc<dyn BackendFactory>> {
        lookup(&self.backends, uri)
    }

    /// Connects a broker for `uri`.
    pub async fn broker_for(
        &self,
        uri: &TransportUri,
        settings: &TransportSettings,
    ) -> Result<Arc<dyn Broker>> {
        let factory = self.broker_factory(uri)?;
        tracing::debug!(uri = %uri, "connecting broker");
        factory.create_broker(uri, settings).await
    }

    /// Connects a backend for `uri`.
    pub async fn backend_for(
        &self,
        uri: &TransportUri,
        settings: &TransportSettings,
    ) -> Result<Arc<dyn Backend>> {
        let factory = self.backend_factory(uri)?;
        tracing::debug!(uri = %uri, "connecting backend");
        factory.create_backend(uri, settings).await
    }

    pub fn broker_schemes(&self) -> Vec<String> {
        sorted_keys(&self.brokers)
    }

    pub fn backend_schemes(&self) -> Vec<String> {
        sorted_keys(&self.backends)
    }
}

fn register<F: ?Sized>(
    map: &mut HashMap<String, Arc<F>>,
    schemes: &[&'static str],
    factory: Arc<F>,
) -> std::result::Result<(), RegistryError> {
    if let Some(taken) = schemes.iter().find(|s| map.contains_key(**s)) {
        return Err(RegistryError::SchemeAlreadyRegistered(taken.to_string()));
    }
    for scheme in schemes {
        map.insert(scheme.to_string(), factory.clone());
    }
    Ok(())
}

fn lookup<F: ?Sized>(map: &HashMap<String, Arc<F>>, uri: &TransportUri) -> Result<Arc<F>> {
    map.get(uri.scheme())
        .cloned()
        .ok_or_else(|| CeleriacError::Configuration {
            scheme: uri.scheme().to_string(),
            supported: sorted_keys(map),
        })
}

fn sorted_keys<F: ?Sized>(map: &HashMap<String, Arc<F>>) -> Vec<String> {
    map.keys()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
