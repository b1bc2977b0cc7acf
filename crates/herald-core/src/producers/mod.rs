//! Producers: the ways events enter the queue.
//!
//! - `EventEmitter`: direct, validated enqueue
//! - `WebhookReceiver`: signature-checked inbound webhooks
//! - `FunctionCallAdapter`: AI function calls, answered inline or enqueued

pub mod emitter;
pub mod function_call;
pub mod signing;
pub mod webhook;

pub use self::emitter::EventEmitter;
pub use self::function_call::{
    EnqueueTarget, FunctionCall, FunctionCallAdapter, FunctionCallError, FunctionCallOutcome,
    FunctionError, FunctionKind, SyncFunction,
};
pub use self::webhook::{WebhookError, WebhookReceipt, WebhookReceiver, WebhookRequest};
