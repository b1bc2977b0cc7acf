//! AppBuilder: wiring plus start-up validation.
//!
//! `build()` fails fast when an active handler definition names a handler
//! that was never registered, instead of letting every such event fail at
//! dispatch time.

use std::sync::Arc;

use crate::domain::HandlerDefinition;
use crate::ports::{Clock, EventStore, SystemClock};
use crate::producers::EventEmitter;
use crate::queue::{InMemoryEventStore, RetryPolicy};
use crate::registry::{EventPayload, Handler, HandlerRegistry, HandlerSet, PayloadHandler, RegistryError};

use super::dispatcher::{Dispatcher, DispatcherConfig};
use super::reaper::{ReaperConfig, StuckEventReaper};
use super::worker_pool::{WorkerPool, WorkerPoolConfig};

/// ```ignore
/// let app = AppBuilder::new()
///     .register("mailer", Arc::new(Mailer))?
///     .define(HandlerDefinition::new("job:send_email", "mailer"))
///     .build()?;
/// let pool = app.spawn_workers(WorkerPoolConfig::default(), None);
/// ```
pub struct AppBuilder {
    handlers: HandlerSet,
    definitions: Vec<HandlerDefinition>,
    store: Option<Arc<dyn EventStore>>,
    clock: Arc<dyn Clock>,
    retry_policy: RetryPolicy,
    dispatcher: DispatcherConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("active handler definitions name unregistered handlers: {0:?}")]
    MissingHandlers(Vec<String>),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            handlers: HandlerSet::new(),
            definitions: Vec::new(),
            store: None,
            clock: Arc::new(SystemClock),
            retry_policy: RetryPolicy::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }

    pub fn register(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<Self, RegistryError> {
        self.handlers.register(name, handler)?;
        Ok(self)
    }

    pub fn register_typed<T, H>(
        mut self,
        name: impl Into<String>,
        handler: H,
    ) -> Result<Self, RegistryError>
    where
        T: EventPayload,
        H: PayloadHandler<T> + 'static,
    {
        self.handlers.register_typed::<T, H>(name, handler)?;
        Ok(self)
    }

    pub fn define(mut self, definition: HandlerDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn define_all(mut self, definitions: impl IntoIterator<Item = HandlerDefinition>) -> Self {
        self.definitions.extend(definitions);
        self
    }

    /// Use an explicit store. Without one an in-memory store is created with
    /// the builder's clock and retry policy.
    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_dispatcher_config(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher = config;
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let mut missing: Vec<String> = self
            .definitions
            .iter()
            .filter(|d| d.is_active && !self.handlers.contains(&d.handler_name))
            .map(|d| d.handler_name.clone())
            .collect();
        missing.sort();
        missing.dedup();
        if !missing.is_empty() {
            return Err(BuildError::MissingHandlers(missing));
        }

        let store = self.store.unwrap_or_else(|| {
            Arc::new(InMemoryEventStore::with_clock(
                self.retry_policy,
                Arc::clone(&self.clock),
            ))
        });
        let registry = Arc::new(HandlerRegistry::from_definitions(self.definitions));
        let handlers = Arc::new(self.handlers);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&handlers),
            self.dispatcher,
        ));

        Ok(App {
            store,
            registry,
            handlers,
            dispatcher,
            clock: self.clock,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The wired queue: store, routing, handlers and a dispatcher over them.
#[derive(Clone)]
pub struct App {
    pub store: Arc<dyn EventStore>,
    pub registry: Arc<HandlerRegistry>,
    pub handlers: Arc<HandlerSet>,
    pub dispatcher: Arc<Dispatcher>,
    pub clock: Arc<dyn Clock>,
}

impl App {
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter::new(Arc::clone(&self.store)).with_registry(Arc::clone(&self.registry))
    }

    pub fn reaper(&self, config: ReaperConfig) -> StuckEventReaper {
        StuckEventReaper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.clock),
            config,
        )
    }

    /// Start the worker pool; pass a reaper config to also run the sweep.
    pub fn spawn_workers(&self, config: WorkerPoolConfig, reaper: Option<ReaperConfig>) -> WorkerPool {
        let reaper = reaper.map(|config| Arc::new(self.reaper(config)));
        WorkerPool::spawn(config, Arc::clone(&self.dispatcher), reaper)
    }
}
