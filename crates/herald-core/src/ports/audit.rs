//! Producer-side collaborators: webhook endpoint registry and audit logs.
//!
//! These are written by the webhook receiver and the function-call adapter.
//! The queue engine never reads them.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{FunctionCallLog, WebhookEndpoint, WebhookLog};

#[derive(Debug, Error)]
#[error("audit storage error: {0}")]
pub struct AuditError(pub String);

/// Registered inbound webhooks and their counters.
#[async_trait]
pub trait WebhookEndpointStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<WebhookEndpoint>, AuditError>;

    async fn upsert(&self, endpoint: WebhookEndpoint) -> Result<(), AuditError>;

    /// Single atomic increment of `received_count`.
    async fn record_received(&self, name: &str) -> Result<(), AuditError>;

    /// Single atomic increment of `failed_count`.
    async fn record_failed(&self, name: &str) -> Result<(), AuditError>;
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record_webhook(&self, log: WebhookLog) -> Result<(), AuditError>;

    async fn record_function_call(&self, log: FunctionCallLog) -> Result<(), AuditError>;
}
