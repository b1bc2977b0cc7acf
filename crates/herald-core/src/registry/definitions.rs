//! HandlerRegistry: routing configuration, event type -> handler definition.
//!
//! Read on every dispatched event, written only by operators, so a plain
//! `RwLock<HashMap>` is enough.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::info;

use super::RegistryError;
use crate::domain::{DEFAULT_MAX_RETRIES, HandlerDefinition, NewEvent};

#[derive(Default)]
pub struct HandlerRegistry {
    definitions: RwLock<HashMap<String, HandlerDefinition>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(definitions: impl IntoIterator<Item = HandlerDefinition>) -> Self {
        let registry = Self::new();
        for definition in definitions {
            registry.upsert(definition);
        }
        registry
    }

    /// Insert or replace the definition for its event type.
    pub fn upsert(&self, definition: HandlerDefinition) {
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        definitions.insert(definition.event_type.clone(), definition);
    }

    /// Definition for `event_type`, active or not.
    ///
    /// An exact match wins; otherwise the longest `:`-delimited prefix with a
    /// definition serves the type, so `webhook:github` routes
    /// `webhook:github:push`.
    pub fn resolve(&self, event_type: &str) -> Result<HandlerDefinition, RegistryError> {
        let definitions = self
            .definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut candidate = event_type;
        loop {
            if let Some(definition) = definitions.get(candidate) {
                return Ok(definition.clone());
            }
            match candidate.rfind(':') {
                Some(split) => candidate = &candidate[..split],
                None => return Err(RegistryError::NoDefinition(event_type.to_string())),
            }
        }
    }

    /// Definition for `event_type`, refused when deactivated.
    pub fn resolve_active(&self, event_type: &str) -> Result<HandlerDefinition, RegistryError> {
        let definition = self.resolve(event_type)?;
        if !definition.is_active {
            return Err(RegistryError::Inactive(event_type.to_string()));
        }
        Ok(definition)
    }

    pub fn set_active(&self, event_type: &str, active: bool) -> Result<(), RegistryError> {
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let definition = definitions
            .get_mut(event_type)
            .ok_or_else(|| RegistryError::NoDefinition(event_type.to_string()))?;
        definition.is_active = active;
        info!(event_type, active, "handler definition toggled");
        Ok(())
    }

    /// All definitions, sorted by event type.
    pub fn list(&self) -> Vec<HandlerDefinition> {
        let definitions = self
            .definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<HandlerDefinition> = definitions.values().cloned().collect();
        all.sort_by(|a, b| a.event_type.cmp(&b.event_type));
        all
    }

    /// Fill routing defaults into a producer request.
    ///
    /// The definition's priority and retry ceiling apply only where the
    /// producer left the field at its default.
    pub fn apply_defaults(&self, new: &mut NewEvent) {
        let Ok(definition) = self.resolve(&new.event_type) else {
            return;
        };
        if new.priority == 0 {
            new.priority = definition.priority;
        }
        if new.max_retries == DEFAULT_MAX_RETRIES {
            new.max_retries = definition.max_retries;
        }
    }
}
