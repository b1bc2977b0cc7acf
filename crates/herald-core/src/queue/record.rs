//! In-place transitions on an `Event` row.
//!
//! Callers must have checked the guard in `state` first; these methods only
//! stamp fields.

use chrono::{DateTime, Utc};

use super::state::FailureTransition;
use crate::domain::{Event, EventStatus};

impl Event {
    pub(crate) fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = EventStatus::Processing;
        self.processing_started_at = Some(now);
        self.updated_at = now;
    }

    pub(crate) fn mark_completed(&mut self, result: Option<serde_json::Value>, now: DateTime<Utc>) {
        self.status = EventStatus::Completed;
        self.processed_at = Some(now);
        self.progress = Some(100);
        self.result = result;
        self.updated_at = now;
    }

    pub(crate) fn apply_failure(
        &mut self,
        transition: FailureTransition,
        message: &str,
        now: DateTime<Utc>,
    ) {
        self.error_message = Some(message.to_string());
        self.updated_at = now;
        match transition {
            FailureTransition::Retry {
                retry_count,
                scheduled_at,
            } => {
                self.status = EventStatus::Pending;
                self.retry_count = retry_count;
                self.scheduled_at = scheduled_at;
            }
            FailureTransition::Exhausted { retry_count } => {
                self.status = EventStatus::Failed;
                self.retry_count = retry_count;
                self.processed_at = Some(now);
            }
        }
    }

    pub(crate) fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = EventStatus::Cancelled;
        self.processed_at = Some(now);
        self.updated_at = now;
    }

    pub(crate) fn set_progress(&mut self, progress: u8, now: DateTime<Utc>) {
        self.progress = Some(progress);
        self.updated_at = now;
    }
}
