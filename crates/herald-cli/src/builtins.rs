//! Handlers and functions that ship with the binary.
//!
//! - `log`: writes the event to the log and completes it
//! - `noop`: completes without doing anything
//! - `echo` (function): replies with its arguments

use async_trait::async_trait;
use herald_core::producers::{FunctionError, SyncFunction};
use herald_core::registry::{Handler, HandlerError, InvocationContext};
use tracing::info;

pub struct LogHandler;

#[async_trait]
impl Handler for LogHandler {
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        payload: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, HandlerError> {
        info!(
            event_id = %ctx.event_id,
            event_type = %ctx.event_type,
            retry_count = ctx.retry_count,
            %payload,
            "event received"
        );
        Ok(None)
    }
}

pub struct NoopHandler;

#[async_trait]
impl Handler for NoopHandler {
    async fn invoke(
        &self,
        _ctx: &InvocationContext,
        _payload: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, HandlerError> {
        Ok(None)
    }
}

pub struct EchoFunction;

#[async_trait]
impl SyncFunction for EchoFunction {
    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value, FunctionError> {
        Ok(arguments)
    }
}
