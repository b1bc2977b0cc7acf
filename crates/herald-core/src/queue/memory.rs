//! In-memory event store.
//!
//! One mutex guards all rows, so every operation (claims included) is a
//! single critical section. Concurrent claimers serialize on the lock and
//! each sees the rows the previous one took as already `processing`, which
//! gives the same exclusivity as skip-locked selection in a database.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::state::{self, FailureTransition};
use super::{RetryPolicy, validate_new_event};
use crate::domain::{
    Claim, Event, EventFilter, EventId, EventStatus, FailureReport, NewEvent, QueueError,
};
use crate::ports::{Clock, EventStore, IdGenerator, QueueCounts, SystemClock, UlidGenerator};

/// Claim-order key for a pending event: priority desc, schedule asc, id asc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PendingKey {
    priority: Reverse<i32>,
    scheduled_at: DateTime<Utc>,
    id: EventId,
}

impl PendingKey {
    fn of(event: &Event) -> Self {
        Self {
            priority: Reverse(event.priority),
            scheduled_at: event.scheduled_at,
            id: event.id,
        }
    }
}

#[derive(Default)]
struct InMemoryState {
    /// All rows (single source of truth).
    events: HashMap<EventId, Event>,

    /// Pending rows in claim order (ids only).
    pending: BTreeSet<PendingKey>,
}

impl InMemoryState {
    fn insert(&mut self, event: Event) {
        self.pending.insert(PendingKey::of(&event));
        self.events.insert(event.id, event);
    }

    fn get_mut(&mut self, id: EventId) -> Result<&mut Event, QueueError> {
        self.events.get_mut(&id).ok_or(QueueError::NotFound(id))
    }
}

pub struct InMemoryEventStore {
    state: Mutex<InMemoryState>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retry_policy: RetryPolicy,
}

impl InMemoryEventStore {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self::with_clock(retry_policy, Arc::new(SystemClock))
    }

    pub fn with_clock(retry_policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self {
            state: Mutex::new(InMemoryState::default()),
            clock,
            ids,
            retry_policy,
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn enqueue(&self, new: NewEvent) -> Result<Event, QueueError> {
        validate_new_event(&new)?;
        let now = self.clock.now();
        let event = Event::from_new(self.ids.generate_event_id(), new, now);

        let mut state = self.state.lock().await;
        if state.events.contains_key(&event.id) {
            return Err(QueueError::DuplicateId(event.id));
        }
        state.insert(event.clone());
        Ok(event)
    }

    async fn enqueue_batch(&self, batch: Vec<NewEvent>) -> Result<Vec<Event>, QueueError> {
        // Validate everything before touching the map so a bad row leaves
        // nothing behind.
        for new in &batch {
            validate_new_event(new)?;
        }
        let now = self.clock.now();
        let events: Vec<Event> = batch
            .into_iter()
            .map(|new| Event::from_new(self.ids.generate_event_id(), new, now))
            .collect();

        let mut state = self.state.lock().await;
        let mut seen = std::collections::HashSet::with_capacity(events.len());
        for event in &events {
            if state.events.contains_key(&event.id) || !seen.insert(event.id) {
                return Err(QueueError::DuplicateId(event.id));
            }
        }
        for event in &events {
            state.insert(event.clone());
        }
        Ok(events)
    }

    async fn cancel(&self, id: EventId) -> Result<Event, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let event = state.get_mut(id)?;
        state::guard_cancel(event)?;
        let key = PendingKey::of(event);
        event.mark_cancelled(now);
        let snapshot = event.clone();
        state.pending.remove(&key);
        Ok(snapshot)
    }

    async fn get(&self, id: EventId) -> Result<Event, QueueError> {
        let state = self.state.lock().await;
        state.events.get(&id).cloned().ok_or(QueueError::NotFound(id))
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, QueueError> {
        let state = self.state.lock().await;
        let mut matched: Vec<&Event> = state.events.values().filter(|e| filter.matches(e)).collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .cloned()
            .collect())
    }

    async fn claim_batch(&self, batch_size: usize) -> Result<Vec<Event>, QueueError> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let keys: Vec<PendingKey> = state
            .pending
            .iter()
            .filter(|key| key.scheduled_at <= now)
            .take(batch_size)
            .copied()
            .collect();

        let mut claimed = Vec::with_capacity(keys.len());
        for key in keys {
            state.pending.remove(&key);
            if let Some(event) = state.events.get_mut(&key.id) {
                event.mark_processing(now);
                claimed.push(event.clone());
            }
        }
        if !claimed.is_empty() {
            debug!(claimed = claimed.len(), "claimed events");
        }
        Ok(claimed)
    }

    async fn complete(
        &self,
        claim: &Claim,
        result: Option<serde_json::Value>,
    ) -> Result<Event, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let event = state.get_mut(claim.event_id)?;
        if state::is_completion_replay(event, claim) {
            return Ok(event.clone());
        }
        state::guard_claim(event, claim, "complete")?;
        event.mark_completed(result, now);
        Ok(event.clone())
    }

    async fn fail(&self, claim: &Claim, report: &FailureReport) -> Result<Event, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let event = state.get_mut(claim.event_id)?;
        state::guard_claim(event, claim, "fail")?;

        let transition = state::decide_failure(event, report, &self.retry_policy, now);
        event.apply_failure(transition, &report.message, now);
        let snapshot = event.clone();
        if let FailureTransition::Retry { .. } = transition {
            state.pending.insert(PendingKey::of(&snapshot));
        }
        Ok(snapshot)
    }

    async fn update_progress(&self, claim: &Claim, progress: u8) -> Result<Event, QueueError> {
        let progress = state::validate_progress(progress)?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let event = state.get_mut(claim.event_id)?;
        state::guard_claim(event, claim, "update progress of")?;
        event.set_progress(progress, now);
        Ok(event.clone())
    }

    async fn counts_by_status(&self) -> Result<QueueCounts, QueueError> {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for event in state.events.values() {
            counts.add(event.status, 1);
        }
        Ok(counts)
    }
}
