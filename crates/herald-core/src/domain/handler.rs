//! Handler configuration: which named handler serves which event type.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::event::DEFAULT_MAX_RETRIES;

/// Default per-invocation timeout.
pub const DEFAULT_HANDLER_TIMEOUT_MS: u64 = 30_000;

/// Routing entry for one event type.
///
/// Created by configuration, toggled by an operator, never deleted by the
/// queue itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerDefinition {
    pub event_type: String,
    pub handler_name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_active() -> bool {
    true
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_timeout_ms() -> u64 {
    DEFAULT_HANDLER_TIMEOUT_MS
}

impl HandlerDefinition {
    pub fn new(event_type: impl Into<String>, handler_name: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            handler_name: handler_name.into(),
            is_active: true,
            priority: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_ms: DEFAULT_HANDLER_TIMEOUT_MS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
