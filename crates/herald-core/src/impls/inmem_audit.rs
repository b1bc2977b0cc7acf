//! In-memory webhook endpoint registry and audit log.
//!
//! Counter bumps happen under the lock, so each one is a single atomic
//! update like `UPDATE ... SET received_count = received_count + 1`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{FunctionCallLog, WebhookEndpoint, WebhookLog};
use crate::ports::{AuditError, AuditLog, WebhookEndpointStore};

#[derive(Default)]
pub struct InMemoryWebhookEndpointStore {
    endpoints: Mutex<HashMap<String, WebhookEndpoint>>,
}

impl InMemoryWebhookEndpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn bump(
        &self,
        name: &str,
        counter: impl FnOnce(&mut WebhookEndpoint),
    ) -> Result<(), AuditError> {
        let mut endpoints = self.endpoints.lock().await;
        let endpoint = endpoints
            .get_mut(name)
            .ok_or_else(|| AuditError(format!("unknown webhook endpoint: {name}")))?;
        counter(endpoint);
        Ok(())
    }
}

#[async_trait]
impl WebhookEndpointStore for InMemoryWebhookEndpointStore {
    async fn get(&self, name: &str) -> Result<Option<WebhookEndpoint>, AuditError> {
        Ok(self.endpoints.lock().await.get(name).cloned())
    }

    async fn upsert(&self, endpoint: WebhookEndpoint) -> Result<(), AuditError> {
        self.endpoints
            .lock()
            .await
            .insert(endpoint.name.clone(), endpoint);
        Ok(())
    }

    async fn record_received(&self, name: &str) -> Result<(), AuditError> {
        self.bump(name, |e| e.received_count += 1).await
    }

    async fn record_failed(&self, name: &str) -> Result<(), AuditError> {
        self.bump(name, |e| e.failed_count += 1).await
    }
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    webhooks: Mutex<Vec<WebhookLog>>,
    function_calls: Mutex<Vec<FunctionCallLog>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest first.
    pub async fn webhook_logs(&self) -> Vec<WebhookLog> {
        self.webhooks.lock().await.clone()
    }

    /// Oldest first.
    pub async fn function_call_logs(&self) -> Vec<FunctionCallLog> {
        self.function_calls.lock().await.clone()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn record_webhook(&self, log: WebhookLog) -> Result<(), AuditError> {
        self.webhooks.lock().await.push(log);
        Ok(())
    }

    async fn record_function_call(&self, log: FunctionCallLog) -> Result<(), AuditError> {
        self.function_calls.lock().await.push(log);
        Ok(())
    }
}
