use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, EventEnvelope, EventQuery, EventStoreError, Result, Version};

/// Concurrency expectation for an append.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// `None` skips the version check.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// The aggregate must not exist yet.
    pub fn expect_new() -> Self {
        Self::expect_version(Version::initial())
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch for one aggregate atomically.
    ///
    /// Fails with `ConcurrencyConflict` when `options.expected_version` does not
    /// match the stored version, in which case nothing is written. Returns the
    /// aggregate's new version.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// Events of one aggregate in version order.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    /// Events matching `query`, in append order.
    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>>;

    /// Every event in append order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;
}

#[async_trait]
pub trait EventStoreExt: EventStore {
    async fn append_event(&self, event: EventEnvelope, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.get_aggregate_version(aggregate_id).await?.is_some())
    }

    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        self.query_events(EventQuery::for_event_type(event_type))
            .await
    }

    /// Events of `event_type` stamped with `correlation_id`.
    async fn get_correlated_events(
        &self,
        event_type: &str,
        correlation_id: &str,
    ) -> Result<Vec<EventEnvelope>> {
        self.query_events(EventQuery::for_event_type(event_type).correlation_id(correlation_id))
            .await
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks that a batch targets one aggregate with consecutive versions.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty batch".to_string(),
        ));
    };

    let mut expected_version = first.version;
    for event in events.iter().skip(1) {
        if event.aggregate_id != first.aggregate_id || event.aggregate_type != first.aggregate_type
        {
            return Err(EventStoreError::InvalidAppend(
                "a batch must target a single aggregate".to_string(),
            ));
        }
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "versions must be consecutive: expected {expected_version}, got {}",
                event.version
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("Order")
            .event_type("Test")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    #[test]
    fn rejects_empty_batch() {
        assert!(matches!(
            validate_events_for_append(&[]),
            Err(EventStoreError::InvalidAppend(_))
        ));
    }

    #[test]
    fn rejects_version_gap() {
        let id = AggregateId::new();
        let batch = [event(id, 1), event(id, 3)];
        assert!(validate_events_for_append(&batch).is_err());
    }

    #[test]
    fn rejects_mixed_aggregates() {
        let batch = [event(AggregateId::new(), 1), event(AggregateId::new(), 2)];
        assert!(validate_events_for_append(&batch).is_err());
    }

    #[test]
    fn accepts_consecutive_batch() {
        let id = AggregateId::new();
        let batch = [event(id, 4), event(id, 5), event(id, 6)];
        assert!(validate_events_for_append(&batch).is_ok());
    }
}
