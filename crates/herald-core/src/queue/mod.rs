//! Queue module: the claim engine, retry machine and store implementations.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod record;
mod retry;
pub mod state;

pub use memory::InMemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
pub use retry::RetryPolicy;
pub use state::FailureTransition;

use crate::domain::{NewEvent, QueueError};

/// Longest accepted event type.
pub const MAX_EVENT_TYPE_LEN: usize = 128;

/// Producer-side checks every store applies before inserting.
pub fn validate_new_event(new: &NewEvent) -> Result<(), QueueError> {
    let event_type = new.event_type.as_str();
    if event_type.is_empty() {
        return Err(QueueError::InvalidEvent("event type must not be empty".into()));
    }
    if event_type.len() > MAX_EVENT_TYPE_LEN {
        return Err(QueueError::InvalidEvent(format!(
            "event type longer than {MAX_EVENT_TYPE_LEN} bytes"
        )));
    }
    if event_type.chars().any(char::is_whitespace) {
        return Err(QueueError::InvalidEvent(format!(
            "event type must not contain whitespace: {event_type:?}"
        )));
    }
    if !new.payload.is_object() {
        return Err(QueueError::InvalidEvent("payload must be a JSON object".into()));
    }
    Ok(())
}
