//! Webhook endpoint configuration and audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::handler::HandlerDefinition;
use super::ids::{EventId, WebhookLogId};

/// HMAC variant used to sign a provider's request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureAlgorithm {
    HmacSha256,
    HmacSha512,
}

impl SignatureAlgorithm {
    /// Prefix some providers put in front of the hex digest (`sha256=...`).
    pub fn header_prefix(self) -> &'static str {
        match self {
            SignatureAlgorithm::HmacSha256 => "sha256=",
            SignatureAlgorithm::HmacSha512 => "sha512=",
        }
    }
}

/// A registered inbound webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub name: String,
    pub provider: String,
    pub secret: String,
    pub signature_header: String,
    pub signature_algorithm: SignatureAlgorithm,
    pub handler_name: String,
    pub event_type_prefix: String,
    /// Header carrying the provider's event name (e.g. `X-GitHub-Event`).
    #[serde(default)]
    pub event_name_header: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub received_count: u64,
    #[serde(default)]
    pub failed_count: u64,
}

fn default_active() -> bool {
    true
}

impl WebhookEndpoint {
    pub fn new(
        name: impl Into<String>,
        provider: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            event_type_prefix: format!("webhook:{name}"),
            handler_name: name.clone(),
            name,
            provider: provider.into(),
            secret: secret.into(),
            signature_header: "X-Signature-256".to_string(),
            signature_algorithm: SignatureAlgorithm::HmacSha256,
            event_name_header: None,
            is_active: true,
            received_count: 0,
            failed_count: 0,
        }
    }

    pub fn with_signature_header(mut self, header: impl Into<String>) -> Self {
        self.signature_header = header.into();
        self
    }

    pub fn with_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.signature_algorithm = algorithm;
        self
    }

    pub fn with_event_type_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.event_type_prefix = prefix.into();
        self
    }

    pub fn with_event_name_header(mut self, header: impl Into<String>) -> Self {
        self.event_name_header = Some(header.into());
        self
    }

    pub fn with_handler_name(mut self, handler_name: impl Into<String>) -> Self {
        self.handler_name = handler_name.into();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Routes every event type under this endpoint's prefix to its handler.
    pub fn routing_definition(&self) -> HandlerDefinition {
        HandlerDefinition::new(self.event_type_prefix.clone(), self.handler_name.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookLogStatus {
    Success,
    SignatureFailed,
    HandlerFailed,
    EndpointInactive,
}

impl fmt::Display for WebhookLogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WebhookLogStatus::Success => "success",
            WebhookLogStatus::SignatureFailed => "signature_failed",
            WebhookLogStatus::HandlerFailed => "handler_failed",
            WebhookLogStatus::EndpointInactive => "endpoint_inactive",
        };
        f.write_str(s)
    }
}

/// Append-only record of one inbound webhook request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookLog {
    pub id: WebhookLogId,
    pub endpoint_name: String,
    pub status: WebhookLogStatus,
    pub event_id: Option<EventId>,
    pub error_message: Option<String>,
    pub body_size: usize,
    pub received_at: DateTime<Utc>,
}
