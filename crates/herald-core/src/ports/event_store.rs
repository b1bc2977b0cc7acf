//! EventStore port: the queue of record.
//!
//! The store is the only shared mutable resource. Every method is a single
//! atomic operation against it; no caller ever reads a row and writes it back
//! in a second call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Claim, Event, EventFilter, EventId, EventStatus, FailureReport, NewEvent, QueueError};

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert one `pending` event.
    async fn enqueue(&self, new: NewEvent) -> Result<Event, QueueError>;

    /// Insert many events; either all become visible or none do.
    async fn enqueue_batch(&self, batch: Vec<NewEvent>) -> Result<Vec<Event>, QueueError>;

    /// `pending -> cancelled`. Refused once the event has been claimed.
    async fn cancel(&self, id: EventId) -> Result<Event, QueueError>;

    async fn get(&self, id: EventId) -> Result<Event, QueueError>;

    /// Newest first.
    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, QueueError>;

    /// Atomically take up to `batch_size` eligible events, highest priority
    /// then oldest schedule first, and mark them `processing`.
    ///
    /// Concurrent callers never receive the same event; rows held by another
    /// claimer are skipped, not waited on.
    async fn claim_batch(&self, batch_size: usize) -> Result<Vec<Event>, QueueError>;

    /// `processing -> completed`. Repeating it for the same claim is a no-op.
    async fn complete(
        &self,
        claim: &Claim,
        result: Option<serde_json::Value>,
    ) -> Result<Event, QueueError>;

    /// Report a failed attempt; the retry policy decides between a delayed
    /// retry and terminal failure.
    async fn fail(&self, claim: &Claim, report: &FailureReport) -> Result<Event, QueueError>;

    /// Record progress (0-100) for a long-running invocation.
    async fn update_progress(&self, claim: &Claim, progress: u8) -> Result<Event, QueueError>;

    async fn counts_by_status(&self) -> Result<QueueCounts, QueueError>;
}

/// Number of events per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl QueueCounts {
    pub fn add(&mut self, status: EventStatus, n: u64) {
        match status {
            EventStatus::Pending => self.pending += n,
            EventStatus::Processing => self.processing += n,
            EventStatus::Completed => self.completed += n,
            EventStatus::Failed => self.failed += n,
            EventStatus::Cancelled => self.cancelled += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed + self.cancelled
    }
}
