//! Event model: the unit of queued work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::EventId;

/// Default retry ceiling for new events.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Lifecycle status of an event.
///
/// Transitions:
/// - Pending -> Processing -> Completed
/// - Pending -> Processing -> Pending (retry scheduled, until max_retries)
/// - Pending -> Processing -> Failed
/// - Pending -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl EventStatus {
    pub const ALL: [EventStatus; 5] = [
        EventStatus::Pending,
        EventStatus::Processing,
        EventStatus::Completed,
        EventStatus::Failed,
        EventStatus::Cancelled,
    ];

    /// No further automatic transition happens from a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventStatus::Completed | EventStatus::Failed | EventStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
            EventStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event status: {0}")]
pub struct ParseStatusError(String);

impl FromStr for EventStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// A stored event row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: EventStatus,
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub scheduled_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub progress: Option<u8>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Build a fresh `pending` row from a producer request.
    pub fn from_new(id: EventId, new: NewEvent, now: DateTime<Utc>) -> Self {
        Self {
            id,
            event_type: new.event_type,
            payload: new.payload,
            status: EventStatus::Pending,
            priority: new.priority,
            retry_count: 0,
            max_retries: new.max_retries,
            scheduled_at: new.scheduled_at.unwrap_or(now),
            processing_started_at: None,
            processed_at: None,
            progress: None,
            result: None,
            error_message: None,
            owner: new.owner,
            created_at: now,
            updated_at: now,
        }
    }

    /// Claimable right now?
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Pending && self.scheduled_at <= now
    }

    /// The live claim on this event, if it is being processed.
    pub fn claim(&self) -> Option<Claim> {
        match (self.status, self.processing_started_at) {
            (EventStatus::Processing, Some(claimed_at)) => Some(Claim {
                event_id: self.id,
                claimed_at,
            }),
            _ => None,
        }
    }
}

/// One worker's lease on one event.
///
/// `claimed_at` is the `processing_started_at` stamped by the claim. A report
/// carrying an older `claimed_at` belongs to an expired lease and is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Claim {
    pub event_id: EventId,
    pub claimed_at: DateTime<Utc>,
}

/// Producer request for a new event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    /// `None` means "now".
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub owner: Option<String>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            priority: 0,
            scheduled_at: None,
            max_retries: DEFAULT_MAX_RETRIES,
            owner: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Filters for `EventStore::list`. Results are newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub status: Option<EventStatus>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            event_type: None,
            status: None,
            owner: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        self.event_type
            .as_deref()
            .is_none_or(|t| event.event_type == t)
            && self.status.is_none_or(|s| event.status == s)
            && self
                .owner
                .as_deref()
                .is_none_or(|o| event.owner.as_deref() == Some(o))
    }
}

/// Whether a failure may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Goes through the retry/backoff machine.
    Retryable,
    /// Terminal on first occurrence (misconfiguration, undecodable payload).
    Permanent,
}

/// What a worker reports when an invocation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub message: String,
    pub kind: FailureKind,
}

impl FailureReport {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Retryable,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Permanent,
        }
    }
}
