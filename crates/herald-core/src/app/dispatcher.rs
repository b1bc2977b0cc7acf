//! Dispatcher: claim a batch, run each event's handler, report the outcome.
//!
//! Every event in a batch runs in its own tokio task under the handler's
//! timeout, so one slow, failing or panicking handler never holds up or
//! poisons the others.

use std::any::Any;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, warn};

use crate::domain::{Claim, Event, EventStatus, FailureReport, HandlerDefinition, QueueError};
use crate::ports::EventStore;
use crate::registry::{
    Handler, HandlerError, HandlerRegistry, HandlerSet, InvocationContext, RegistryError,
};

/// Default number of events claimed per tick.
pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub batch_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Tally of one `run_once` tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub claimed: usize,
    pub completed: usize,
    /// Failed but rescheduled.
    pub retried: usize,
    /// Terminally failed.
    pub failed: usize,
    /// Outcome could not be written back to the store.
    pub report_errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Retried,
    Failed,
    ReportError,
}

impl DispatchSummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Retried => self.retried += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::ReportError => self.report_errors += 1,
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn EventStore>,
    registry: Arc<HandlerRegistry>,
    handlers: Arc<HandlerSet>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn EventStore>,
        registry: Arc<HandlerRegistry>,
        handlers: Arc<HandlerSet>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            registry,
            handlers,
            config,
        }
    }

    pub fn config(&self) -> DispatcherConfig {
        self.config
    }

    /// One tick: claim up to `batch_size` events and see each to a report.
    ///
    /// Only the claim itself can fail the tick; per-event report errors are
    /// logged and counted in the summary.
    pub async fn run_once(&self) -> Result<DispatchSummary, QueueError> {
        let claimed = self.store.claim_batch(self.config.batch_size).await?;
        let mut summary = DispatchSummary {
            claimed: claimed.len(),
            ..DispatchSummary::default()
        };

        let mut in_flight = JoinSet::new();
        for event in claimed {
            let Some(claim) = event.claim() else {
                error!(event_id = %event.id, status = %event.status, "claimed event carries no claim");
                summary.report_errors += 1;
                continue;
            };
            let route = self.route(&event.event_type);
            in_flight.spawn(dispatch_one(Arc::clone(&self.store), event, claim, route));
        }

        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    error!(error = %e, "dispatch task aborted");
                    summary.report_errors += 1;
                }
            }
        }
        Ok(summary)
    }

    fn route(
        &self,
        event_type: &str,
    ) -> Result<(HandlerDefinition, Arc<dyn Handler>), RegistryError> {
        let definition = self.registry.resolve_active(event_type)?;
        let handler = self
            .handlers
            .get(&definition.handler_name)
            .ok_or_else(|| RegistryError::NoImplementation(definition.handler_name.clone()))?;
        Ok((definition, handler))
    }
}

async fn dispatch_one(
    store: Arc<dyn EventStore>,
    event: Event,
    claim: Claim,
    route: Result<(HandlerDefinition, Arc<dyn Handler>), RegistryError>,
) -> Outcome {
    let (definition, handler) = match route {
        Ok(route) => route,
        Err(e) => {
            warn!(event_id = %event.id, event_type = %event.event_type, error = %e, "no runnable handler");
            return report_failure(store.as_ref(), &claim, FailureReport::permanent(e.to_string()))
                .await;
        }
    };

    let ctx = InvocationContext::new(
        claim,
        event.event_type.clone(),
        event.retry_count,
        Arc::clone(&store),
    );
    let payload = event.payload;
    let mut invocation = tokio::spawn(async move { handler.invoke(&ctx, payload).await });

    let timeout = definition.timeout();
    let result = match tokio::time::timeout(timeout, &mut invocation).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(HandlerError::retryable(describe_join_error(join_error))),
        Err(_) => {
            invocation.abort();
            Err(HandlerError::retryable(format!(
                "handler '{}' timed out after {}ms",
                definition.handler_name, definition.timeout_ms
            )))
        }
    };

    match result {
        Ok(value) => match store.complete(&claim, value).await {
            Ok(_) => {
                debug!(event_id = %claim.event_id, handler = %definition.handler_name, "event completed");
                Outcome::Completed
            }
            Err(e) => {
                warn!(event_id = %claim.event_id, error = %e, "failed to record completion");
                Outcome::ReportError
            }
        },
        Err(err) => {
            debug!(event_id = %claim.event_id, handler = %definition.handler_name, error = %err, "handler failed");
            report_failure(store.as_ref(), &claim, err.into()).await
        }
    }
}

async fn report_failure(store: &dyn EventStore, claim: &Claim, report: FailureReport) -> Outcome {
    match store.fail(claim, &report).await {
        Ok(event) if event.status == EventStatus::Pending => {
            debug!(
                event_id = %event.id,
                retry_count = event.retry_count,
                scheduled_at = %event.scheduled_at,
                "event rescheduled"
            );
            Outcome::Retried
        }
        Ok(event) => {
            warn!(
                event_id = %event.id,
                retry_count = event.retry_count,
                error = %report.message,
                "event failed"
            );
            Outcome::Failed
        }
        Err(e) => {
            warn!(event_id = %claim.event_id, error = %e, "failed to record failure");
            Outcome::ReportError
        }
    }
}

fn describe_join_error(err: JoinError) -> String {
    if !err.is_panic() {
        return "handler task was cancelled".to_string();
    }
    let panic = err.into_panic();
    format!("handler panicked: {}", panic_message(panic.as_ref()))
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use crate::domain::{FailureKind, NewEvent};
    use crate::ports::FixedClock;
    use crate::queue::{InMemoryEventStore, RetryPolicy};

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn invoke(
            &self,
            _ctx: &InvocationContext,
            payload: serde_json::Value,
        ) -> Result<Option<serde_json::Value>, HandlerError> {
            Ok(Some(payload))
        }
    }

    struct Flaky {
        calls: AtomicUsize,
        kind: FailureKind,
    }

    #[async_trait]
    impl Handler for Flaky {
        async fn invoke(
            &self,
            _ctx: &InvocationContext,
            _payload: serde_json::Value,
        ) -> Result<Option<serde_json::Value>, HandlerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError {
                message: format!("attempt {n} failed"),
                kind: self.kind,
            })
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Handler for Sleepy {
        async fn invoke(
            &self,
            _ctx: &InvocationContext,
            _payload: serde_json::Value,
        ) -> Result<Option<serde_json::Value>, HandlerError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
    }

    struct Panicky;

    #[async_trait]
    impl Handler for Panicky {
        async fn invoke(
            &self,
            _ctx: &InvocationContext,
            _payload: serde_json::Value,
        ) -> Result<Option<serde_json::Value>, HandlerError> {
            panic!("boom");
        }
    }

    struct Harness {
        store: Arc<InMemoryEventStore>,
        clock: Arc<FixedClock>,
        dispatcher: Dispatcher,
    }

    fn harness(definitions: Vec<HandlerDefinition>, handlers: HandlerSet) -> Harness {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryEventStore::with_clock(
            RetryPolicy::default(),
            clock.clone(),
        ));
        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::new(HandlerRegistry::from_definitions(definitions)),
            Arc::new(handlers),
            DispatcherConfig::default(),
        );
        Harness {
            store,
            clock,
            dispatcher,
        }
    }

    fn with(mut set: HandlerSet, name: &str, handler: Arc<dyn Handler>) -> HandlerSet {
        set.register(name, handler).unwrap();
        set
    }

    #[tokio::test]
    async fn successful_handler_completes_with_result() {
        let h = harness(
            vec![HandlerDefinition::new("job:echo", "echo")],
            with(HandlerSet::new(), "echo", Arc::new(Echo)),
        );
        let event = h
            .store
            .enqueue(NewEvent::new("job:echo", serde_json::json!({"n": 1})))
            .await
            .unwrap();

        let summary = h.dispatcher.run_once().await.unwrap();
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.completed, 1);

        let event = h.store.get(event.id).await.unwrap();
        assert_eq!(event.status, EventStatus::Completed);
        assert_eq!(event.result, Some(serde_json::json!({"n": 1})));
        assert_eq!(event.progress, Some(100));
    }

    #[tokio::test]
    async fn failing_handler_retries_then_exhausts() {
        let flaky = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            kind: FailureKind::Retryable,
        });
        let h = harness(
            vec![HandlerDefinition::new("job:flaky", "flaky")],
            with(HandlerSet::new(), "flaky", flaky.clone()),
        );
        let event = h
            .store
            .enqueue(NewEvent::new("job:flaky", serde_json::json!({})))
            .await
            .unwrap();

        let first = h.dispatcher.run_once().await.unwrap();
        assert_eq!(first.retried, 1);
        let after_first = h.store.get(event.id).await.unwrap();
        assert_eq!(after_first.status, EventStatus::Pending);
        assert_eq!(after_first.retry_count, 1);
        assert_eq!(after_first.error_message.as_deref(), Some("attempt 0 failed"));

        // Not yet due.
        assert_eq!(h.dispatcher.run_once().await.unwrap().claimed, 0);

        h.clock.advance(chrono::Duration::minutes(5));
        assert_eq!(h.dispatcher.run_once().await.unwrap().retried, 1);

        h.clock.advance(chrono::Duration::minutes(10));
        let last = h.dispatcher.run_once().await.unwrap();
        assert_eq!(last.failed, 1);

        let event = h.store.get(event.id).await.unwrap();
        assert_eq!(event.status, EventStatus::Failed);
        assert_eq!(event.retry_count, 3);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_handler_error_fails_immediately() {
        let h = harness(
            vec![HandlerDefinition::new("job:bad", "bad")],
            with(
                HandlerSet::new(),
                "bad",
                Arc::new(Flaky {
                    calls: AtomicUsize::new(0),
                    kind: FailureKind::Permanent,
                }),
            ),
        );
        let event = h
            .store
            .enqueue(NewEvent::new("job:bad", serde_json::json!({})))
            .await
            .unwrap();

        assert_eq!(h.dispatcher.run_once().await.unwrap().failed, 1);
        assert_eq!(h.store.get(event.id).await.unwrap().status, EventStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_and_inactive_types_fail_permanently() {
        let h = harness(
            vec![
                HandlerDefinition::new("job:off", "echo").inactive(),
                HandlerDefinition::new("job:ghost", "ghost"),
            ],
            with(HandlerSet::new(), "echo", Arc::new(Echo)),
        );
        let mut ids = Vec::new();
        for event_type in ["job:unknown", "job:off", "job:ghost"] {
            let event = h
                .store
                .enqueue(NewEvent::new(event_type, serde_json::json!({})))
                .await
                .unwrap();
            ids.push(event.id);
        }

        let summary = h.dispatcher.run_once().await.unwrap();
        assert_eq!(summary.claimed, 3);
        assert_eq!(summary.failed, 3);

        for id in ids {
            let event = h.store.get(id).await.unwrap();
            assert_eq!(event.status, EventStatus::Failed);
            assert!(event.error_message.is_some());
        }
    }

    #[tokio::test]
    async fn timeout_and_panic_are_retryable_and_isolated() {
        let h = harness(
            vec![
                HandlerDefinition::new("job:slow", "slow").with_timeout(Duration::from_millis(20)),
                HandlerDefinition::new("job:panic", "panic"),
                HandlerDefinition::new("job:echo", "echo"),
            ],
            with(
                with(
                    with(HandlerSet::new(), "slow", Arc::new(Sleepy)),
                    "panic",
                    Arc::new(Panicky),
                ),
                "echo",
                Arc::new(Echo),
            ),
        );
        let slow = h
            .store
            .enqueue(NewEvent::new("job:slow", serde_json::json!({})))
            .await
            .unwrap();
        let panicky = h
            .store
            .enqueue(NewEvent::new("job:panic", serde_json::json!({})))
            .await
            .unwrap();
        h.store
            .enqueue(NewEvent::new("job:echo", serde_json::json!({})))
            .await
            .unwrap();

        let summary = h.dispatcher.run_once().await.unwrap();
        assert_eq!(summary.claimed, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.retried, 2);

        let slow = h.store.get(slow.id).await.unwrap();
        assert!(slow.error_message.unwrap().contains("timed out"));
        let panicky = h.store.get(panicky.id).await.unwrap();
        assert!(panicky.error_message.unwrap().contains("panicked: boom"));
    }

    #[tokio::test]
    async fn empty_queue_is_a_quiet_tick() {
        let h = harness(Vec::new(), HandlerSet::new());
        assert_eq!(h.dispatcher.run_once().await.unwrap(), DispatchSummary::default());
    }
}
