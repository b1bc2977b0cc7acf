//! Ports: the seams between the queue core and its collaborators.
//!
//! - `EventStore`: queue of record (in-memory or Postgres)
//! - `WebhookEndpointStore` / `AuditLog`: producer-side bookkeeping
//! - `Clock` / `IdGenerator`: time and identity, swappable in tests

pub mod audit;
pub mod clock;
pub mod event_store;
pub mod id_generator;

pub use self::audit::{AuditError, AuditLog, WebhookEndpointStore};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_store::{EventStore, QueueCounts};
pub use self::id_generator::{IdGenerator, UlidGenerator};
