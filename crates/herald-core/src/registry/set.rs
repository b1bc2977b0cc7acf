//! HandlerSet: named handler implementations.
//!
//! Built once during start-up, read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use super::RegistryError;
use super::handler::{EventPayload, Handler, PayloadHandler, TypedHandler};

#[derive(Default, Clone)]
pub struct HandlerSet {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Register a typed handler; the payload is decoded before `handle` runs.
    pub fn register_typed<T, H>(
        &mut self,
        name: impl Into<String>,
        handler: H,
    ) -> Result<(), RegistryError>
    where
        T: EventPayload,
        H: PayloadHandler<T> + 'static,
    {
        self.register(name, Arc::new(TypedHandler::<T, H>::new(handler)))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
