use chrono::{DateTime, Utc};

use crate::AggregateId;

/// Filter over the event log. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub aggregate_id: Option<AggregateId>,
    pub aggregate_type: Option<String>,

    /// Matches any of these event types.
    pub event_types: Option<Vec<String>>,

    /// Matches the `correlation_id` metadata entry.
    pub correlation_id: Option<String>,

    /// Inclusive lower bound.
    pub from_timestamp: Option<DateTime<Utc>>,

    /// Inclusive upper bound.
    pub to_timestamp: Option<DateTime<Utc>>,

    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_aggregate(aggregate_id: AggregateId) -> Self {
        Self::new().aggregate_id(aggregate_id)
    }

    pub fn for_event_type(event_type: impl Into<String>) -> Self {
        Self::new().event_type(event_type)
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types = Some(vec![event_type.into()]);
        self
    }

    pub fn event_types<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = Some(event_types.into_iter().map(Into::into).collect());
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chain_sets_filters() {
        let id = AggregateId::new();
        let query = EventQuery::for_event_type("OrderPlaced")
            .aggregate_id(id)
            .correlation_id("pi_1")
            .limit(10);

        assert_eq!(query.aggregate_id, Some(id));
        assert_eq!(query.event_types, Some(vec!["OrderPlaced".to_string()]));
        assert_eq!(query.correlation_id.as_deref(), Some("pi_1"));
        assert_eq!(query.limit, Some(10));
    }

    #[test]
    fn event_types_accepts_str_slices() {
        let query = EventQuery::new().event_types(["OrderPlaced", "PaymentConfirmed"]);
        assert_eq!(query.event_types.map(|t| t.len()), Some(2));
    }
}
