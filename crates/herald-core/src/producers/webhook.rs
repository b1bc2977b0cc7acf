//! WebhookReceiver: signature-checked webhook ingress.
//!
//! Every request that names a known endpoint leaves exactly one audit
//! record. Only a verified request can produce an event; a rejected one
//! bumps the endpoint's `failed_count` and nothing else.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use super::signing::verify_signature;
use crate::domain::{
    Event, EventId, NewEvent, QueueError, WebhookEndpoint, WebhookLog, WebhookLogId,
    WebhookLogStatus,
};
use crate::ports::{AuditError, AuditLog, Clock, EventStore, IdGenerator, WebhookEndpointStore};
use crate::queue::validate_new_event;

/// Used when neither a header nor the body names the provider's event.
pub const DEFAULT_EVENT_NAME: &str = "received";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("unknown webhook endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("webhook endpoint {0} is inactive")]
    Inactive(String),

    #[error("signature verification failed for endpoint {0}")]
    InvalidSignature(String),

    #[error("failed to enqueue webhook event: {0}")]
    Enqueue(#[from] QueueError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// One inbound request: the raw body plus its headers.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub body: Vec<u8>,
    headers: BTreeMap<String, String>,
}

impl WebhookRequest {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert_header(name, value);
        self
    }

    pub fn insert_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Case-insensitive lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookReceipt {
    pub event_id: EventId,
    pub event_type: String,
    pub log_id: WebhookLogId,
}

pub struct WebhookReceiver {
    endpoints: Arc<dyn WebhookEndpointStore>,
    audit: Arc<dyn AuditLog>,
    store: Arc<dyn EventStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl WebhookReceiver {
    pub fn new(
        endpoints: Arc<dyn WebhookEndpointStore>,
        audit: Arc<dyn AuditLog>,
        store: Arc<dyn EventStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            endpoints,
            audit,
            store,
            ids,
            clock,
        }
    }

    pub async fn receive(
        &self,
        endpoint_name: &str,
        request: WebhookRequest,
    ) -> Result<WebhookReceipt, WebhookError> {
        let endpoint = self
            .endpoints
            .get(endpoint_name)
            .await?
            .ok_or_else(|| WebhookError::UnknownEndpoint(endpoint_name.to_string()))?;

        if !endpoint.is_active {
            self.audit(
                &endpoint,
                &request,
                WebhookLogStatus::EndpointInactive,
                None,
                Some("endpoint is inactive".to_string()),
            )
            .await;
            return Err(WebhookError::Inactive(endpoint.name));
        }

        let verified = request
            .header(&endpoint.signature_header)
            .is_some_and(|provided| {
                verify_signature(
                    endpoint.signature_algorithm,
                    endpoint.secret.as_bytes(),
                    &request.body,
                    provided,
                )
            });
        if !verified {
            warn!(endpoint = %endpoint.name, "webhook signature rejected");
            self.count_failure(&endpoint.name).await;
            self.audit(
                &endpoint,
                &request,
                WebhookLogStatus::SignatureFailed,
                None,
                Some(format!("missing or invalid {} header", endpoint.signature_header)),
            )
            .await;
            return Err(WebhookError::InvalidSignature(endpoint.name));
        }

        match self.enqueue(&endpoint, &request).await {
            Ok(event) => {
                if let Err(e) = self.endpoints.record_received(&endpoint.name).await {
                    warn!(endpoint = %endpoint.name, error = %e, "failed to count webhook");
                }
                let log_id = self
                    .audit(&endpoint, &request, WebhookLogStatus::Success, Some(event.id), None)
                    .await;
                info!(
                    endpoint = %endpoint.name,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "webhook accepted"
                );
                Ok(WebhookReceipt {
                    event_id: event.id,
                    event_type: event.event_type,
                    log_id,
                })
            }
            Err(e) => {
                warn!(endpoint = %endpoint.name, error = %e, "webhook could not be enqueued");
                self.count_failure(&endpoint.name).await;
                self.audit(
                    &endpoint,
                    &request,
                    WebhookLogStatus::HandlerFailed,
                    None,
                    Some(e.to_string()),
                )
                .await;
                Err(WebhookError::Enqueue(e))
            }
        }
    }

    async fn enqueue(
        &self,
        endpoint: &WebhookEndpoint,
        request: &WebhookRequest,
    ) -> Result<Event, QueueError> {
        let new = webhook_event(endpoint, request);
        validate_new_event(&new)?;
        self.store.enqueue(new).await
    }

    async fn count_failure(&self, endpoint_name: &str) {
        if let Err(e) = self.endpoints.record_failed(endpoint_name).await {
            warn!(endpoint = %endpoint_name, error = %e, "failed to count webhook failure");
        }
    }

    /// Append the audit record. A lost audit write is logged, not surfaced:
    /// the request outcome already happened.
    async fn audit(
        &self,
        endpoint: &WebhookEndpoint,
        request: &WebhookRequest,
        status: WebhookLogStatus,
        event_id: Option<EventId>,
        error_message: Option<String>,
    ) -> WebhookLogId {
        let id = self.ids.generate_webhook_log_id();
        let log = WebhookLog {
            id,
            endpoint_name: endpoint.name.clone(),
            status,
            event_id,
            error_message,
            body_size: request.body.len(),
            received_at: self.clock.now(),
        };
        if let Err(e) = self.audit.record_webhook(log).await {
            warn!(endpoint = %endpoint.name, %status, error = %e, "failed to write webhook log");
        }
        id
    }
}

/// Build the event for a verified request.
///
/// Type is `{prefix}:{name}`, where the name comes from the endpoint's event
/// name header, else the body's `type` or `event` field, else `received`.
/// A body that is not JSON is carried as a string.
pub fn webhook_event(endpoint: &WebhookEndpoint, request: &WebhookRequest) -> NewEvent {
    let body: serde_json::Value = serde_json::from_slice(&request.body)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&request.body).into_owned()));

    let event_name = endpoint
        .event_name_header
        .as_deref()
        .and_then(|header| request.header(header))
        .map(str::to_string)
        .or_else(|| {
            ["type", "event"]
                .iter()
                .find_map(|key| body.get(key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string());

    NewEvent::new(
        format!("{}:{event_name}", endpoint.event_type_prefix),
        serde_json::json!({
            "endpoint": endpoint.name,
            "provider": endpoint.provider,
            "handler": endpoint.handler_name,
            "body": body,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventStatus, SignatureAlgorithm};
    use crate::impls::{InMemoryAuditLog, InMemoryWebhookEndpointStore};
    use crate::ports::{SystemClock, UlidGenerator};
    use crate::producers::signing::compute_signature;
    use crate::queue::{InMemoryEventStore, RetryPolicy};

    struct Harness {
        endpoints: Arc<InMemoryWebhookEndpointStore>,
        audit: Arc<InMemoryAuditLog>,
        store: Arc<InMemoryEventStore>,
        receiver: WebhookReceiver,
    }

    async fn harness() -> Harness {
        let endpoints = Arc::new(InMemoryWebhookEndpointStore::new());
        endpoints
            .upsert(
                WebhookEndpoint::new("github", "github", "s3cret")
                    .with_signature_header("X-Hub-Signature-256")
                    .with_event_name_header("X-GitHub-Event"),
            )
            .await
            .unwrap();
        endpoints
            .upsert(WebhookEndpoint::new("legacy", "acme", "old").inactive())
            .await
            .unwrap();

        let audit = Arc::new(InMemoryAuditLog::new());
        let store = Arc::new(InMemoryEventStore::new(RetryPolicy::default()));
        let clock = Arc::new(SystemClock);
        let receiver = WebhookReceiver::new(
            endpoints.clone(),
            audit.clone(),
            store.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
            clock,
        );
        Harness {
            endpoints,
            audit,
            store,
            receiver,
        }
    }

    fn signed(body: &[u8], secret: &str) -> String {
        format!(
            "sha256={}",
            compute_signature(SignatureAlgorithm::HmacSha256, secret.as_bytes(), body)
        )
    }

    #[tokio::test]
    async fn valid_signature_enqueues_event() {
        let h = harness().await;
        let body = br#"{"action":"opened"}"#;
        let request = WebhookRequest::new(body.to_vec())
            .with_header("x-hub-signature-256", signed(body, "s3cret"))
            .with_header("X-GitHub-Event", "pull_request");

        let receipt = h.receiver.receive("github", request).await.unwrap();
        assert_eq!(receipt.event_type, "webhook:github:pull_request");

        let event = h.store.get(receipt.event_id).await.unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.payload["body"]["action"], "opened");
        assert_eq!(event.payload["handler"], "github");

        let endpoint = h.endpoints.get("github").await.unwrap().unwrap();
        assert_eq!((endpoint.received_count, endpoint.failed_count), (1, 0));

        let logs = h.audit.webhook_logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, WebhookLogStatus::Success);
        assert_eq!(logs[0].event_id, Some(receipt.event_id));
    }

    #[tokio::test]
    async fn bad_signature_creates_no_event() {
        let h = harness().await;
        let body = br#"{"action":"opened"}"#;
        let request = WebhookRequest::new(body.to_vec())
            .with_header("X-Hub-Signature-256", signed(body, "wrong"));

        let err = h.receiver.receive("github", request).await.unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature(_)));

        assert_eq!(h.store.counts_by_status().await.unwrap().total(), 0);
        let endpoint = h.endpoints.get("github").await.unwrap().unwrap();
        assert_eq!((endpoint.received_count, endpoint.failed_count), (0, 1));

        let logs = h.audit.webhook_logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, WebhookLogStatus::SignatureFailed);
        assert_eq!(logs[0].event_id, None);
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let h = harness().await;
        let err = h
            .receiver
            .receive("github", WebhookRequest::new(b"{}".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn unknown_and_inactive_endpoints() {
        let h = harness().await;
        assert!(matches!(
            h.receiver
                .receive("nope", WebhookRequest::new(b"{}".to_vec()))
                .await,
            Err(WebhookError::UnknownEndpoint(_))
        ));
        assert!(matches!(
            h.receiver
                .receive("legacy", WebhookRequest::new(b"{}".to_vec()))
                .await,
            Err(WebhookError::Inactive(_))
        ));

        let logs = h.audit.webhook_logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, WebhookLogStatus::EndpointInactive);
    }

    #[tokio::test]
    async fn unusable_event_name_is_a_handler_failure() {
        let h = harness().await;
        let body = br#"{}"#;
        let request = WebhookRequest::new(body.to_vec())
            .with_header("X-Hub-Signature-256", signed(body, "s3cret"))
            .with_header("X-GitHub-Event", "two words");

        let err = h.receiver.receive("github", request).await.unwrap_err();
        assert!(matches!(err, WebhookError::Enqueue(QueueError::InvalidEvent(_))));

        let endpoint = h.endpoints.get("github").await.unwrap().unwrap();
        assert_eq!(endpoint.failed_count, 1);
        let logs = h.audit.webhook_logs().await;
        assert_eq!(logs[0].status, WebhookLogStatus::HandlerFailed);
    }

    #[test]
    fn event_name_falls_back_to_body_then_default() {
        let endpoint = WebhookEndpoint::new("stripe", "stripe", "k");

        let typed = webhook_event(
            &endpoint,
            &WebhookRequest::new(br#"{"type":"charge.succeeded"}"#.to_vec()),
        );
        assert_eq!(typed.event_type, "webhook:stripe:charge.succeeded");

        let evented = webhook_event(&endpoint, &WebhookRequest::new(br#"{"event":"ping"}"#.to_vec()));
        assert_eq!(evented.event_type, "webhook:stripe:ping");

        let plain = webhook_event(&endpoint, &WebhookRequest::new(b"hello".to_vec()));
        assert_eq!(plain.event_type, "webhook:stripe:received");
        assert_eq!(plain.payload["body"], "hello");
    }
}
