//! Domain model: events, handler routing, webhook and function-call audit
//! records, identifiers and errors.

pub mod errors;
pub mod event;
pub mod function_call;
pub mod handler;
pub mod ids;
pub mod webhook;

pub use self::errors::QueueError;
pub use self::event::{
    Claim, DEFAULT_MAX_RETRIES, Event, EventFilter, EventStatus, FailureKind, FailureReport,
    NewEvent,
};
pub use self::function_call::{FunctionCallLog, FunctionCallStatus};
pub use self::handler::HandlerDefinition;
pub use self::ids::{EventId, FunctionCallLogId, Id, IdMarker, ParseIdError, WebhookLogId};
pub use self::webhook::{SignatureAlgorithm, WebhookEndpoint, WebhookLog, WebhookLogStatus};
