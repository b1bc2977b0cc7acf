//! IdGenerator port.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::ids::{EventId, FunctionCallLogId, Id, IdMarker, WebhookLogId};
use crate::ports::Clock;

/// Generates identifiers that sort by creation time.
pub trait IdGenerator: Send + Sync {
    fn generate_event_id(&self) -> EventId;

    fn generate_webhook_log_id(&self) -> WebhookLogId;

    fn generate_function_call_log_id(&self) -> FunctionCallLogId;
}

/// ULID generator; the timestamp half comes from the injected clock.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn generate<T: IdMarker>(&self) -> Id<T> {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        Id::from_ulid(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_event_id(&self) -> EventId {
        self.generate()
    }

    fn generate_webhook_log_id(&self) -> WebhookLogId {
        self.generate()
    }

    fn generate_function_call_log_id(&self) -> FunctionCallLogId {
        self.generate()
    }
}
