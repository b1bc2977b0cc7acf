//! Transition rules shared by every store.
//!
//! The functions here are pure: stores call them inside their own atomic
//! section (a mutex critical section, or a conditional `UPDATE`).

use chrono::{DateTime, Utc};

use super::RetryPolicy;
use crate::domain::{Claim, Event, EventStatus, FailureKind, FailureReport, QueueError};

/// What a reported failure does to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTransition {
    /// Back to `pending`, eligible again at `scheduled_at`.
    Retry {
        retry_count: u32,
        scheduled_at: DateTime<Utc>,
    },
    /// Terminal `failed`.
    Exhausted { retry_count: u32 },
}

/// Decide between retry and terminal failure.
///
/// The failure being reported is attempt number `retry_count + 1`. It is
/// retried only while that number stays below `max_retries`, so with
/// `max_retries = 3` the third failure is terminal and `retry_count` never
/// exceeds the ceiling.
pub fn decide_failure(
    event: &Event,
    report: &FailureReport,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> FailureTransition {
    let next_count = event.retry_count.saturating_add(1);
    if report.kind == FailureKind::Permanent || next_count >= event.max_retries {
        return FailureTransition::Exhausted {
            retry_count: next_count.min(event.max_retries),
        };
    }
    let scheduled_at = now
        .checked_add_signed(policy.next_delay(next_count))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    FailureTransition::Retry {
        retry_count: next_count,
        scheduled_at,
    }
}

/// The report must come from the live claim on a `processing` event.
pub fn guard_claim(event: &Event, claim: &Claim, action: &'static str) -> Result<(), QueueError> {
    if event.status != EventStatus::Processing {
        return Err(QueueError::InvalidTransition {
            id: event.id,
            from: event.status,
            action,
        });
    }
    if event.processing_started_at != Some(claim.claimed_at) {
        return Err(QueueError::StaleClaim(event.id));
    }
    Ok(())
}

/// A second `complete` for the claim that already completed the event.
pub fn is_completion_replay(event: &Event, claim: &Claim) -> bool {
    event.status == EventStatus::Completed && event.processing_started_at == Some(claim.claimed_at)
}

pub fn guard_cancel(event: &Event) -> Result<(), QueueError> {
    if event.status != EventStatus::Pending {
        return Err(QueueError::InvalidTransition {
            id: event.id,
            from: event.status,
            action: "cancel",
        });
    }
    Ok(())
}

pub fn validate_progress(progress: u8) -> Result<u8, QueueError> {
    if progress > 100 {
        return Err(QueueError::InvalidEvent(format!(
            "progress must be between 0 and 100, got {progress}"
        )));
    }
    Ok(progress)
}
