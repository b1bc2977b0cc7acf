//! WorkerPool: N independent dispatch loops on a fixed tick.
//!
//! Workers share nothing but the store behind the dispatcher; the store's
//! atomic claim is the only coordination between them.
//! - `request_shutdown()` stops new ticks; an in-flight tick runs to its end
//! - `shutdown_and_join()` waits for every loop to exit

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::reaper::StuckEventReaper;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.workers` dispatch loops, plus a reaper loop if given.
    pub fn spawn(
        config: WorkerPoolConfig,
        dispatcher: Arc<Dispatcher>,
        reaper: Option<Arc<StuckEventReaper>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(config.workers + 1);
        for worker_id in 0..config.workers {
            let dispatcher = Arc::clone(&dispatcher);
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(worker_loop(
                worker_id,
                dispatcher,
                config.poll_interval,
                rx,
            )));
        }
        if let Some(reaper) = reaper {
            joins.push(tokio::spawn(reaper_loop(reaper, shutdown_rx)));
        }
        info!(workers = config.workers, "worker pool started");

        Self { shutdown_tx, joins }
    }

    /// Stop taking new batches. Ticks already running finish normally.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                warn!(error = %e, "worker task ended abnormally");
            }
        }
        info!("worker pool stopped");
    }
}

/// Wait for the next tick; `false` once shutdown has been requested.
async fn next_tick(ticker: &mut tokio::time::Interval, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    tokio::select! {
        changed = shutdown_rx.changed() => {
            // Sender dropped counts as shutdown.
            changed.is_ok() && !*shutdown_rx.borrow()
        }
        _ = ticker.tick() => true,
    }
}

async fn worker_loop(
    worker_id: usize,
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while next_tick(&mut ticker, &mut shutdown_rx).await {
        match dispatcher.run_once().await {
            Ok(summary) if summary.claimed > 0 => {
                debug!(
                    worker_id,
                    claimed = summary.claimed,
                    completed = summary.completed,
                    retried = summary.retried,
                    failed = summary.failed,
                    report_errors = summary.report_errors,
                    "batch dispatched"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(worker_id, error = %e, "claim failed"),
        }
    }
    debug!(worker_id, "worker stopped");
}

async fn reaper_loop(reaper: Arc<StuckEventReaper>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(reaper.config().interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while next_tick(&mut ticker, &mut shutdown_rx).await {
        match reaper.sweep().await {
            Ok(0) => {}
            Ok(reclaimed) => info!(reclaimed, "reaper sweep reclaimed events"),
            Err(e) => warn!(error = %e, "reaper sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::app::dispatcher::DispatcherConfig;
    use crate::domain::{EventStatus, HandlerDefinition, NewEvent};
    use crate::ports::EventStore;
    use crate::queue::{InMemoryEventStore, RetryPolicy};
    use crate::registry::{Handler, HandlerError, HandlerRegistry, HandlerSet, InvocationContext};

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        async fn invoke(
            &self,
            _ctx: &InvocationContext,
            _payload: serde_json::Value,
        ) -> Result<Option<serde_json::Value>, HandlerError> {
            Ok(None)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pool_drains_queue_and_shuts_down() {
        let store = Arc::new(InMemoryEventStore::new(RetryPolicy::default()));
        let mut handlers = HandlerSet::new();
        handlers.register("noop", Arc::new(Noop)).unwrap();
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            Arc::new(HandlerRegistry::from_definitions([HandlerDefinition::new(
                "job:noop", "noop",
            )])),
            Arc::new(handlers),
            DispatcherConfig { batch_size: 4 },
        ));

        for i in 0..12 {
            store
                .enqueue(NewEvent::new("job:noop", serde_json::json!({ "i": i })))
                .await
                .unwrap();
        }

        let pool = WorkerPool::spawn(
            WorkerPoolConfig {
                workers: 3,
                poll_interval: Duration::from_millis(10),
            },
            dispatcher,
            None,
        );

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let counts = store.counts_by_status().await.unwrap();
            if counts.completed == 12 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "queue not drained: {counts:?}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        pool.shutdown_and_join().await;
        let counts = store.counts_by_status().await.unwrap();
        assert_eq!(counts.completed, 12);
        assert_eq!(counts.processing, 0);

        let listed = store
            .list(&crate::domain::EventFilter {
                status: Some(EventStatus::Completed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 12);
    }
}
