//! herald-core
//!
//! A durable event queue with a retry scheduler.
//!
//! - **domain**: events, handler definitions, webhook and function-call records, errors
//! - **ports**: `EventStore`, endpoint/audit stores, clock and id generation
//! - **queue**: claim engine, retry/backoff machine, in-memory and Postgres stores
//! - **registry**: handler trait, typed handlers, routing definitions
//! - **app**: dispatcher, worker pool, stuck-event reaper, builder
//! - **producers**: direct emit, webhook ingress, function-call adapter
//! - **impls**: in-memory endpoint and audit stores

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod producers;
pub mod queue;
pub mod registry;
