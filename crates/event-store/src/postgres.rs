use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, CORRELATION_ID, EventEnvelope, EventId, EventQuery, EventStoreError, Result,
    Version,
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
};

const SELECT_EVENTS: &str = "SELECT position, id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata FROM events";

/// Advisory lock key taken by every append.
const APPEND_LOCK: i64 = 0x6576_656e_7473;

/// Event store backed by the `events` table (see `migrations/`).
///
/// The `(aggregate_id, version)` unique constraint is the final arbiter of
/// concurrent appends; the explicit version read only produces a nicer error.
///
/// Appends hold a transaction-scoped advisory lock, so positions commit in
/// the order they were allocated. A reader never sees a position before a
/// lower one that is still uncommitted, which lets projections resume from
/// the last position they read.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata: HashMap<String, serde_json::Value> =
            serde_json::from_value(row.try_get("metadata")?)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            metadata,
            position: Some(row.try_get("position")?),
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK)
            .execute(&mut *tx)
            .await?;

        if let Some(expected) = options.expected_version {
            let current: Option<i64> =
                sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                    .bind(aggregate_id.as_uuid())
                    .fetch_one(&mut *tx)
                    .await?;
            let actual = Version::new(current.unwrap_or(0));
            if actual != expected {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected,
                    actual,
                });
            }
        }

        let mut last_version = Version::initial();
        for event in &events {
            sqlx::query(
                r#"
                INSERT INTO events (id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(event.aggregate_id.as_uuid())
            .bind(&event.aggregate_type)
            .bind(event.version.as_i64())
            .bind(event.timestamp)
            .bind(&event.payload)
            .bind(serde_json::to_value(&event.metadata)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db)
                    if db.constraint() == Some("unique_aggregate_version") =>
                {
                    EventStoreError::ConcurrencyConflict {
                        aggregate_id,
                        expected: options.expected_version.unwrap_or_default(),
                        actual: event.version,
                    }
                }
                other => EventStoreError::Database(other),
            })?;
            last_version = event.version;
        }

        tx.commit().await?;
        metrics::counter!("event_store_appended_events_total").increment(events.len() as u64);
        Ok(last_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(&format!(
            "{SELECT_EVENTS} WHERE aggregate_id = $1 ORDER BY version ASC"
        ))
        .bind(aggregate_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let mut sql: QueryBuilder<Postgres> = QueryBuilder::new(SELECT_EVENTS);
        sql.push(" WHERE TRUE");

        if let Some(id) = query.aggregate_id {
            sql.push(" AND aggregate_id = ").push_bind(id.as_uuid());
        }
        if let Some(aggregate_type) = query.aggregate_type {
            sql.push(" AND aggregate_type = ").push_bind(aggregate_type);
        }
        if let Some(event_types) = query.event_types {
            sql.push(" AND event_type = ANY(")
                .push_bind(event_types)
                .push(")");
        }
        if let Some(correlation_id) = query.correlation_id {
            sql.push(format!(" AND metadata->>'{CORRELATION_ID}' = "))
                .push_bind(correlation_id);
        }
        if let Some(from) = query.from_timestamp {
            sql.push(" AND timestamp >= ").push_bind(from);
        }
        if let Some(to) = query.to_timestamp {
            sql.push(" AND timestamp <= ").push_bind(to);
        }

        sql.push(" ORDER BY position ASC");

        if let Some(limit) = query.limit {
            sql.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = sql.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::StreamExt;

        let pool = self.pool.clone();
        let stream = async_stream_rows(pool).map(|row| row.and_then(Self::row_to_event));
        Ok(Box::pin(stream))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }
}

/// Reads the whole log in append order.
///
/// Rows are fetched eagerly so the returned stream owns its data and does not
/// borrow the pool.
fn async_stream_rows(
    pool: PgPool,
) -> impl futures_core::Stream<Item = Result<PgRow>> + Send + 'static {
    use futures_util::{StreamExt, TryStreamExt, stream};

    stream::once(async move {
        sqlx::query(&format!("{SELECT_EVENTS} ORDER BY position ASC"))
            .fetch_all(&pool)
            .await
            .map_err(EventStoreError::from)
    })
    .map_ok(|rows| stream::iter(rows.into_iter().map(Ok)))
    .try_flatten()
    .boxed()
}
