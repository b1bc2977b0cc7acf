//! Handler trait: the executable side of an event type.
//!
//! Handlers are stored type-erased (`Arc<dyn Handler>`) and receive the raw
//! JSON payload. `PayloadHandler<T>` plus `TypedHandler` give a typed API on
//! top: the payload is decoded into `T` before the handler sees it.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{Claim, EventId, FailureKind, FailureReport, QueueError};
use crate::ports::EventStore;

/// Error returned by a handler invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub kind: FailureKind,
}

impl HandlerError {
    /// Goes through retry/backoff.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Retryable,
        }
    }

    /// Fails the event on the spot.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Permanent,
        }
    }
}

impl From<HandlerError> for FailureReport {
    fn from(err: HandlerError) -> Self {
        FailureReport {
            message: err.message,
            kind: err.kind,
        }
    }
}

/// What a handler knows about the invocation it is serving.
#[derive(Clone)]
pub struct InvocationContext {
    pub event_id: EventId,
    pub event_type: String,
    /// Failures recorded before this attempt.
    pub retry_count: u32,
    claim: Claim,
    store: Arc<dyn EventStore>,
}

impl InvocationContext {
    pub fn new(
        claim: Claim,
        event_type: impl Into<String>,
        retry_count: u32,
        store: Arc<dyn EventStore>,
    ) -> Self {
        Self {
            event_id: claim.event_id,
            event_type: event_type.into(),
            retry_count,
            claim,
            store,
        }
    }

    pub fn claim(&self) -> &Claim {
        &self.claim
    }

    /// Record progress (0-100) against this invocation's claim.
    pub async fn report_progress(&self, progress: u8) -> Result<(), QueueError> {
        self.store.update_progress(&self.claim, progress).await?;
        Ok(())
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("event_id", &self.event_id)
            .field("event_type", &self.event_type)
            .field("retry_count", &self.retry_count)
            .field("claim", &self.claim)
            .finish_non_exhaustive()
    }
}

/// Object-safe handler over raw JSON payloads.
///
/// `Ok(Some(value))` is stored as the event's `result`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        payload: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, HandlerError>;
}

/// A payload type bound to one event type.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendEmail { to: String }
///
/// impl EventPayload for SendEmail {
///     const EVENT_TYPE: &'static str = "job:send_email";
/// }
/// ```
pub trait EventPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const EVENT_TYPE: &'static str;
}

/// Typed handler for one payload type.
#[async_trait]
pub trait PayloadHandler<T: EventPayload>: Send + Sync {
    async fn handle(
        &self,
        ctx: &InvocationContext,
        payload: T,
    ) -> Result<Option<serde_json::Value>, HandlerError>;
}

/// Erases a `PayloadHandler<T>` into a `Handler`.
pub struct TypedHandler<T: EventPayload, H: PayloadHandler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: EventPayload, H: PayloadHandler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: EventPayload, H: PayloadHandler<T>> Handler for TypedHandler<T, H> {
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        payload: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, HandlerError> {
        // A payload that does not decode now never will.
        let payload: T = serde_json::from_value(payload).map_err(|e| {
            HandlerError::permanent(format!("cannot decode {} payload: {e}", T::EVENT_TYPE))
        })?;
        self.handler.handle(ctx, payload).await
    }
}
