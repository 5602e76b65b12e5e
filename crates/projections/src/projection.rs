//! Projection trait and position tracking.

use async_trait::async_trait;
use event_store::EventEnvelope;

use crate::Result;

/// Where a projection is in the global log: the last position it consumed,
/// and how many events that took.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionPosition {
    pub last_position: i64,
    pub events_processed: u64,
}

impl ProjectionPosition {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn advance(&self, event: &EventEnvelope) -> Self {
        Self {
            last_position: event.position.unwrap_or(self.last_position).max(self.last_position),
            events_processed: self.events_processed + 1,
        }
    }

    /// True when the event sits at or before the last consumed position.
    /// Events that were never stored have no position and are never seen.
    pub fn has_seen(&self, event: &EventEnvelope) -> bool {
        event.position.is_some_and(|p| p <= self.last_position)
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "position({}, {} events)",
            self.last_position, self.events_processed
        )
    }
}

/// Folds events from the log into a read model.
///
/// `handle` sees every event in the log, including ones it ignores, and must
/// advance its position past each so catch-up can resume where it left off.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    async fn position(&self) -> ProjectionPosition;

    async fn reset(&self) -> Result<()>;
}
