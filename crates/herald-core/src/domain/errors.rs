//! Queue errors.

use thiserror::Error;

use super::event::EventStatus;
use super::ids::EventId;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("event not found: {0}")]
    NotFound(EventId),

    #[error("cannot {action} event {id} in status {from}")]
    InvalidTransition {
        id: EventId,
        from: EventStatus,
        action: &'static str,
    },

    /// The report belongs to a lease that is no longer current.
    #[error("claim on event {0} is no longer held")]
    StaleClaim(EventId),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("duplicate event id: {0}")]
    DuplicateId(EventId),

    #[error("storage error: {0}")]
    Storage(String),
}

impl QueueError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        QueueError::Storage(err.to_string())
    }

    /// Caller error, as opposed to store trouble.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, QueueError::Storage(_))
    }
}
