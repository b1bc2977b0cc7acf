//! EventEmitter: the direct producer API.
//!
//! Input is validated before anything touches the store, so a rejected
//! request never leaves a row behind. Owner-scoped helpers let a caller act
//! only on its own events; `owner` is fixed at insert, so the check cannot
//! race a concurrent update.

use std::sync::Arc;

use tracing::debug;

use crate::domain::{Event, EventId, NewEvent, QueueError};
use crate::ports::EventStore;
use crate::queue::validate_new_event;
use crate::registry::{EventPayload, HandlerRegistry};

#[derive(Clone)]
pub struct EventEmitter {
    store: Arc<dyn EventStore>,
    registry: Option<Arc<HandlerRegistry>>,
}

impl EventEmitter {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            registry: None,
        }
    }

    /// Fill priority and retry ceiling from routing definitions.
    pub fn with_registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    fn prepare(&self, mut new: NewEvent) -> Result<NewEvent, QueueError> {
        validate_new_event(&new)?;
        if let Some(registry) = &self.registry {
            registry.apply_defaults(&mut new);
        }
        Ok(new)
    }

    pub async fn emit(&self, new: NewEvent) -> Result<Event, QueueError> {
        let new = self.prepare(new)?;
        let event = self.store.enqueue(new).await?;
        debug!(event_id = %event.id, event_type = %event.event_type, "event emitted");
        Ok(event)
    }

    /// Emit a typed payload under its own event type.
    pub async fn emit_payload<T: EventPayload>(&self, payload: &T) -> Result<Event, QueueError> {
        let value = serde_json::to_value(payload)
            .map_err(|e| QueueError::InvalidEvent(format!("payload does not serialize: {e}")))?;
        self.emit(NewEvent::new(T::EVENT_TYPE, value)).await
    }

    /// All or nothing: one invalid entry rejects the whole batch.
    pub async fn emit_batch(&self, batch: Vec<NewEvent>) -> Result<Vec<Event>, QueueError> {
        let batch = batch
            .into_iter()
            .map(|new| self.prepare(new))
            .collect::<Result<Vec<_>, _>>()?;
        let events = self.store.enqueue_batch(batch).await?;
        debug!(count = events.len(), "event batch emitted");
        Ok(events)
    }

    /// Read an event the caller owns. Someone else's event reads as missing.
    pub async fn get_owned(&self, id: EventId, owner: &str) -> Result<Event, QueueError> {
        let event = self.store.get(id).await?;
        if event.owner.as_deref() != Some(owner) {
            return Err(QueueError::NotFound(id));
        }
        Ok(event)
    }

    /// Cancel a pending event the caller owns.
    pub async fn cancel_owned(&self, id: EventId, owner: &str) -> Result<Event, QueueError> {
        self.get_owned(id, owner).await?;
        self.store.cancel(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    use crate::domain::{EventFilter, EventStatus, HandlerDefinition};
    use crate::queue::{InMemoryEventStore, RetryPolicy};

    fn emitter() -> (Arc<InMemoryEventStore>, EventEmitter) {
        let store = Arc::new(InMemoryEventStore::new(RetryPolicy::default()));
        let emitter = EventEmitter::new(store.clone());
        (store, emitter)
    }

    #[tokio::test]
    async fn invalid_input_creates_no_event() {
        let (store, emitter) = emitter();

        let err = emitter
            .emit(NewEvent::new("has space", serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidEvent(_)));

        let err = emitter
            .emit_batch(vec![
                NewEvent::new("job:ok", serde_json::json!({})),
                NewEvent::new("job:bad", serde_json::json!(42)),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidEvent(_)));

        assert_eq!(store.counts_by_status().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn owner_scoping() {
        let (_store, emitter) = emitter();
        let event = emitter
            .emit(NewEvent::new("job:export", serde_json::json!({})).with_owner("alice"))
            .await
            .unwrap();

        assert!(emitter.get_owned(event.id, "alice").await.is_ok());
        assert!(matches!(
            emitter.get_owned(event.id, "bob").await,
            Err(QueueError::NotFound(_))
        ));
        assert!(matches!(
            emitter.cancel_owned(event.id, "bob").await,
            Err(QueueError::NotFound(_))
        ));

        let cancelled = emitter.cancel_owned(event.id, "alice").await.unwrap();
        assert_eq!(cancelled.status, EventStatus::Cancelled);
    }

    #[derive(Serialize, Deserialize)]
    struct Export {
        format: String,
    }

    impl EventPayload for Export {
        const EVENT_TYPE: &'static str = "job:export";
    }

    #[tokio::test]
    async fn typed_payload_uses_its_event_type_and_routing_defaults() {
        let store = Arc::new(InMemoryEventStore::new(RetryPolicy::default()));
        let registry = Arc::new(HandlerRegistry::from_definitions([HandlerDefinition::new(
            "job:export",
            "exporter",
        )
        .with_priority(9)]));
        let emitter = EventEmitter::new(store.clone()).with_registry(registry);

        let event = emitter
            .emit_payload(&Export {
                format: "csv".into(),
            })
            .await
            .unwrap();
        assert_eq!(event.event_type, "job:export");
        assert_eq!(event.priority, 9);
        assert_eq!(event.payload, serde_json::json!({ "format": "csv" }));

        let listed = store.list(&EventFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}
