//! Append-only event log.
//!
//! Every aggregate in the order engine is persisted as an ordered stream of
//! events. Writers append with an expected version; a stale writer gets
//! [`EventStoreError::ConcurrencyConflict`] and nothing is written.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{CORRELATION_ID, EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::EventQuery;
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream};
