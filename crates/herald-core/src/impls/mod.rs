//! In-process implementations of the producer-side ports.
//!
//! Event stores live in `queue`; this module holds the bookkeeping stores
//! used by the webhook receiver and the function-call adapter.

pub mod inmem_audit;

pub use self::inmem_audit::{InMemoryAuditLog, InMemoryWebhookEndpointStore};
