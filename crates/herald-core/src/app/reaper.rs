//! StuckEventReaper: operator sweep for events a worker never reported on.
//!
//! An event stays `processing` if its worker died mid-invocation. The sweep
//! fails every such event whose claim is older than its handler timeout
//! plus a grace period, as a retryable failure, so it re-enters the retry
//! machine. Reports are claim-guarded: a worker that does report late gets
//! `StaleClaim` instead of overwriting the reclaimed event.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::handler::DEFAULT_HANDLER_TIMEOUT_MS;
use crate::domain::{Event, EventFilter, EventStatus, FailureReport, QueueError};
use crate::ports::{Clock, EventStore};
use crate::registry::HandlerRegistry;

pub const REAPED_MESSAGE: &str = "processing timed out (reclaimed by reaper)";

const SCAN_PAGE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    /// Time between sweeps when run from the worker pool.
    pub interval: Duration,
    /// Extra slack on top of the handler timeout.
    pub grace: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            grace: Duration::from_secs(60),
        }
    }
}

pub struct StuckEventReaper {
    store: Arc<dyn EventStore>,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    config: ReaperConfig,
}

impl StuckEventReaper {
    pub fn new(
        store: Arc<dyn EventStore>,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            config,
        }
    }

    pub fn config(&self) -> ReaperConfig {
        self.config
    }

    /// Fail every overdue `processing` event. Returns how many were reclaimed.
    pub async fn sweep(&self) -> Result<usize, QueueError> {
        let now = self.clock.now();
        let stuck = self.processing_events().await?;

        let mut reclaimed = 0;
        for event in stuck {
            let Some(claim) = event.claim() else {
                continue;
            };
            let timeout = self
                .registry
                .resolve(&event.event_type)
                .map(|d| d.timeout())
                .unwrap_or(Duration::from_millis(DEFAULT_HANDLER_TIMEOUT_MS));
            let Ok(allowance) = chrono::Duration::from_std(timeout + self.config.grace) else {
                continue;
            };
            let overdue = claim
                .claimed_at
                .checked_add_signed(allowance)
                .is_some_and(|deadline| deadline < now);
            if !overdue {
                continue;
            }

            match self
                .store
                .fail(&claim, &FailureReport::retryable(REAPED_MESSAGE))
                .await
            {
                Ok(updated) => {
                    info!(
                        event_id = %updated.id,
                        event_type = %updated.event_type,
                        status = %updated.status,
                        "reclaimed stuck event"
                    );
                    reclaimed += 1;
                }
                // The worker reported between our scan and our fail.
                Err(QueueError::StaleClaim(id) | QueueError::InvalidTransition { id, .. }) => {
                    debug!(event_id = %id, "stuck event already moved on");
                }
                Err(e) => {
                    warn!(event_id = %claim.event_id, error = %e, "failed to reclaim stuck event");
                }
            }
        }
        Ok(reclaimed)
    }

    async fn processing_events(&self) -> Result<Vec<Event>, QueueError> {
        let mut all = Vec::new();
        let mut filter = EventFilter {
            status: Some(EventStatus::Processing),
            limit: SCAN_PAGE,
            ..EventFilter::default()
        };
        loop {
            let page = self.store.list(&filter).await?;
            let len = page.len();
            all.extend(page);
            if len < SCAN_PAGE {
                break;
            }
            filter.offset += SCAN_PAGE;
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::domain::{HandlerDefinition, NewEvent};
    use crate::ports::FixedClock;
    use crate::queue::{InMemoryEventStore, RetryPolicy};

    struct Harness {
        store: Arc<InMemoryEventStore>,
        clock: Arc<FixedClock>,
        reaper: StuckEventReaper,
    }

    fn harness() -> Harness {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryEventStore::with_clock(
            RetryPolicy::default(),
            clock.clone(),
        ));
        let registry = Arc::new(HandlerRegistry::from_definitions([HandlerDefinition::new(
            "job:slow", "slow",
        )
        .with_timeout(Duration::from_secs(30))]));
        let reaper = StuckEventReaper::new(
            store.clone(),
            registry,
            clock.clone(),
            ReaperConfig {
                interval: Duration::from_secs(60),
                grace: Duration::from_secs(30),
            },
        );
        Harness {
            store,
            clock,
            reaper,
        }
    }

    #[tokio::test]
    async fn only_overdue_events_are_reclaimed() {
        let h = harness();
        let event = h
            .store
            .enqueue(NewEvent::new("job:slow", serde_json::json!({})))
            .await
            .unwrap();
        let claimed = h.store.claim_batch(1).await.unwrap().remove(0);

        h.clock.advance(chrono::Duration::seconds(59));
        assert_eq!(h.reaper.sweep().await.unwrap(), 0);

        h.clock.advance(chrono::Duration::seconds(2));
        assert_eq!(h.reaper.sweep().await.unwrap(), 1);

        let event = h.store.get(event.id).await.unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.retry_count, 1);
        assert_eq!(event.error_message.as_deref(), Some(REAPED_MESSAGE));

        // The original worker's late report is refused.
        let late = h.store.complete(&claimed.claim().unwrap(), None).await;
        assert!(late.is_err());
    }

    #[tokio::test]
    async fn unknown_types_use_the_default_timeout() {
        let h = harness();
        h.store
            .enqueue(NewEvent::new("job:unrouted", serde_json::json!({})))
            .await
            .unwrap();
        h.store.claim_batch(1).await.unwrap();

        h.clock.advance(chrono::Duration::seconds(45));
        assert_eq!(h.reaper.sweep().await.unwrap(), 0);

        h.clock.advance(chrono::Duration::seconds(30));
        assert_eq!(h.reaper.sweep().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sweep_on_idle_queue_does_nothing() {
        let h = harness();
        assert_eq!(h.reaper.sweep().await.unwrap(), 0);
    }
}
