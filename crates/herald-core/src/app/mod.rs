//! Application layer: the dispatcher, the worker pool that drives it, the
//! stuck-event reaper, and the builder that wires them over a store.

pub mod builder;
pub mod dispatcher;
pub mod reaper;
pub mod worker_pool;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::dispatcher::{DispatchSummary, Dispatcher, DispatcherConfig};
pub use self::reaper::{ReaperConfig, StuckEventReaper};
pub use self::worker_pool::{WorkerPool, WorkerPoolConfig};
