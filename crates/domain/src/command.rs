//! Loading aggregates and persisting the events their commands produce.

use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventStore, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// State after the new events were applied.
    pub aggregate: A,
    pub events: Vec<A::Event>,
    pub new_version: Version,
}

/// Envelope-level data attached to every event a command produces.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub timestamp: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
}

impl EventContext {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(timestamp),
            correlation_id: None,
        }
    }

    pub fn correlated(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Runs commands against one aggregate type.
///
/// `execute` loads the aggregate, lets the command inspect it and produce
/// events, then appends them expecting the version that was loaded. If
/// another writer appended in between, the append fails with a concurrency
/// conflict and nothing is written, so each command is an atomic
/// compare-and-set on the aggregate.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> Clone for CommandHandler<S, A>
where
    S: EventStore + Clone,
    A: Aggregate,
{
    fn clone(&self) -> Self {
        Self::new(self.store.clone())
    }
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
    A::Event: DeserializeOwned + Serialize,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replays the aggregate. Unknown ids yield `A::default()`.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let events = self.store.get_events_for_aggregate(aggregate_id).await?;

        let mut aggregate = A::default();
        for envelope in events {
            let event: A::Event = envelope.decode()?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Like [`load_existing`](Self::load_existing) but a missing aggregate is an error.
    pub async fn load_required(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        self.load_existing(aggregate_id)
            .await?
            .ok_or_else(|| DomainError::AggregateNotFound {
                aggregate_type: A::aggregate_type(),
                aggregate_id: aggregate_id.to_string(),
            })
    }

    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        self.execute_with(aggregate_id, EventContext::default(), command_fn)
            .await
    }

    pub async fn execute_with<F>(
        &self,
        aggregate_id: AggregateId,
        context: EventContext,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(aggregate_id).await?;
        let current_version = aggregate.version();

        let events = command_fn(&aggregate)?;
        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events,
                new_version: current_version,
            });
        }

        let envelopes = self.build_envelopes(aggregate_id, current_version, &context, &events)?;
        let new_version = self
            .store
            .append(envelopes, AppendOptions::expect_version(current_version))
            .await?;

        aggregate.apply_events(events.iter().cloned());
        aggregate.set_version(new_version);

        Ok(CommandResult {
            aggregate,
            events,
            new_version,
        })
    }

    fn build_envelopes(
        &self,
        aggregate_id: AggregateId,
        current_version: Version,
        context: &EventContext,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let mut version = current_version;
        events
            .iter()
            .map(|event| {
                version = version.next();
                let mut builder = EventEnvelope::builder()
                    .aggregate_id(aggregate_id)
                    .aggregate_type(A::aggregate_type())
                    .event_type(event.event_type())
                    .version(version)
                    .payload(event)?;
                if let Some(timestamp) = context.timestamp {
                    builder = builder.timestamp(timestamp);
                }
                if let Some(ref correlation_id) = context.correlation_id {
                    builder = builder.correlation_id(correlation_id.clone());
                }
                Ok(builder.build()?)
            })
            .collect()
    }
}
