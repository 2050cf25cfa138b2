//! TaskRegistry - handler id → handler.
//!
//! The worker only depends on `TaskLookup`; how handlers are discovered is up
//! to the embedding application. `TaskRegistry` is the explicit,
//! registration-based implementation.

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::TaskHandler;
use crate::error::RegistryError;

/// Lookup capability consumed by the worker.
pub trait TaskLookup: Send + Sync {
    fn get_task(&self, handler_id: &str) -> Option<Arc<dyn TaskHandler>>;
}

#[derive(Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: impl TaskHandler + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(handler))
    }

    pub fn register_arc(&mut self, handler: Arc<dyn TaskHandler>) -> Result<(), RegistryError> {
        let id = handler.id().to_string();
        if self.handlers.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        self.handlers.insert(id, handler);
        Ok(())
    }

    /// Builder-style `register`.
    pub fn with(mut self, handler: impl TaskHandler + 'static) -> Result<Self, RegistryError> {
        self.register(handler)?;
        Ok(self)
    }

    pub fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl TaskLookup for TaskRegistry {
    fn get_task(&self, handler_id: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(handler_id).cloned()
    }
}
