//! Function-call audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{EventId, FunctionCallLogId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionCallStatus {
    /// Answered synchronously.
    Success,
    /// Turned into a queued event.
    Enqueued,
    Failed,
}

/// Append-only record of one AI-issued function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallLog {
    pub id: FunctionCallLogId,
    pub function_name: String,
    pub arguments: serde_json::Value,
    pub status: FunctionCallStatus,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub event_id: Option<EventId>,
    pub owner: Option<String>,
    pub called_at: DateTime<Utc>,
}
