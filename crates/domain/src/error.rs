//! Domain error types.

use event_store::EventStoreError;
use thiserror::Error;

use crate::order::OrderError;
use crate::settings::SettingsError;
use crate::settlement::SettlementError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// True when another writer got to the aggregate first.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_conflict())
    }
}
