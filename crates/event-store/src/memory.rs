use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventQuery, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
};

#[derive(Default)]
struct Log {
    /// Append order; an event's position is its index plus one.
    events: Vec<EventEnvelope>,
    versions: HashMap<AggregateId, Version>,
}

/// Event store held entirely in process memory.
///
/// Used when no database is configured and throughout the test suites. The
/// version check and the write happen under one lock, so it offers the same
/// optimistic-concurrency guarantee as the PostgreSQL store.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }
}

fn matches(query: &EventQuery, event: &EventEnvelope) -> bool {
    if query.aggregate_id.is_some_and(|id| event.aggregate_id != id) {
        return false;
    }
    if let Some(ref aggregate_type) = query.aggregate_type
        && &event.aggregate_type != aggregate_type
    {
        return false;
    }
    if let Some(ref types) = query.event_types
        && !types.contains(&event.event_type)
    {
        return false;
    }
    if let Some(ref correlation_id) = query.correlation_id
        && event.correlation_id() != Some(correlation_id.as_str())
    {
        return false;
    }
    if query.from_timestamp.is_some_and(|from| event.timestamp < from) {
        return false;
    }
    if query.to_timestamp.is_some_and(|to| event.timestamp > to) {
        return false;
    }
    true
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let mut log = self.log.write().await;
        let current = log
            .versions
            .get(&aggregate_id)
            .copied()
            .unwrap_or_default();

        if let Some(expected) = options.expected_version
            && current != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current,
            });
        }

        // Mirrors the (aggregate_id, version) unique constraint.
        if events[0].version != current.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: events[0].version,
                actual: current,
            });
        }

        let last = events[events.len() - 1].version;
        log.versions.insert(aggregate_id, last);
        let mut position = log.events.len() as i64;
        log.events.extend(events.into_iter().map(|mut event| {
            position += 1;
            event.position = Some(position);
            event
        }));

        Ok(last)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        Ok(log
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        let matching = log.events.iter().filter(|e| matches(&query, e)).cloned();
        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        let events = self.log.read().await.events.clone();
        Ok(Box::pin(futures_util::stream::iter(
            events.into_iter().map(Ok),
        )))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        Ok(self.log.read().await.versions.get(&aggregate_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventStoreExt;

    fn event(aggregate_id: AggregateId, version: i64, event_type: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("Order")
            .event_type(event_type)
            .version(Version::new(version))
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn append_and_read_back_in_version_order() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let version = store
            .append(
                vec![event(id, 1, "OrderPlaced"), event(id, 2, "PaymentConfirmed")],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();
        assert_eq!(version, Version::new(2));

        let events = store.get_events_for_aggregate(id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, "PaymentConfirmed");
        assert_eq!(events[0].position, Some(1));
        assert_eq!(events[1].position, Some(2));
    }

    #[tokio::test]
    async fn stale_expected_version_is_a_conflict() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, 1, "OrderPlaced")], AppendOptions::expect_new())
            .await
            .unwrap();

        let err = store
            .append(vec![event(id, 1, "OrderPlaced")], AppendOptions::expect_new())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn unchecked_append_still_rejects_duplicate_version() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, 1, "A")], AppendOptions::new())
            .await
            .unwrap();

        let err = store
            .append(vec![event(id, 1, "B")], AppendOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn concurrent_writers_at_same_version_yield_one_winner() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, 1, "OrderPlaced")], AppendOptions::expect_new())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append(
                        vec![event(id, 2, "PaymentConfirmed")],
                        AppendOptions::expect_version(Version::first()),
                    )
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn query_by_correlation_id() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        let c = AggregateId::new();

        for (id, intent) in [(a, "pi_1"), (b, "pi_1"), (c, "pi_2")] {
            let placed = EventEnvelope::builder()
                .aggregate_id(id)
                .aggregate_type("Order")
                .event_type("OrderPlaced")
                .version(Version::first())
                .payload_raw(serde_json::json!({}))
                .correlation_id(intent)
                .build()
                .unwrap();
            store
                .append(vec![placed], AppendOptions::expect_new())
                .await
                .unwrap();
        }

        let siblings = store
            .get_correlated_events("OrderPlaced", "pi_1")
            .await
            .unwrap();
        let ids: Vec<_> = siblings.iter().map(|e| e.aggregate_id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[tokio::test]
    async fn stream_preserves_append_order() {
        use futures_util::StreamExt;

        let store = InMemoryEventStore::new();
        let first = AggregateId::new();
        let second = AggregateId::new();
        store
            .append(vec![event(first, 1, "A")], AppendOptions::new())
            .await
            .unwrap();
        store
            .append(vec![event(second, 1, "B")], AppendOptions::new())
            .await
            .unwrap();

        let events: Vec<_> = store.stream_all_events().await.unwrap().collect().await;
        let types: Vec<_> = events
            .into_iter()
            .map(|e| e.unwrap().event_type)
            .collect();
        assert_eq!(types, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn aggregate_version_tracks_last_append() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        assert!(store.get_aggregate_version(id).await.unwrap().is_none());

        store
            .append(vec![event(id, 1, "A"), event(id, 2, "B")], AppendOptions::new())
            .await
            .unwrap();
        assert_eq!(
            store.get_aggregate_version(id).await.unwrap(),
            Some(Version::new(2))
        );
        assert!(store.aggregate_exists(id).await.unwrap());
    }
}
