//! Feeds events from the store to registered projections.

use event_store::{EventEnvelope, EventStore};
use futures_util::StreamExt;
use tokio::sync::Mutex;

use crate::Result;
use crate::projection::Projection;

/// Delivers the event log to projections.
///
/// Catch-up runs are serialized: two workers calling
/// [`run_catch_up`](Self::run_catch_up) at once take turns, so no event is
/// delivered twice.
pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    projections: Vec<Box<dyn Projection>>,
    catch_up: Mutex<()>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            projections: Vec::new(),
            catch_up: Mutex::new(()),
        }
    }

    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Streams the log and hands each projection the events past the last
    /// position it consumed. Gaps in the positions are skipped over.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<()> {
        let _guard = self.catch_up.lock().await;
        let mut stream = self.store.stream_all_events().await?;
        let mut scanned: u64 = 0;
        let mut delivered: u64 = 0;

        while let Some(result) = stream.next().await {
            let event = result?;
            scanned += 1;

            for projection in &self.projections {
                if !projection.position().await.has_seen(&event) {
                    projection.handle(&event).await?;
                    delivered += 1;
                }
            }
        }

        if delivered > 0 {
            metrics::counter!("projection_events_processed_total").increment(delivered);
            tracing::debug!(events = scanned, delivered, "catch-up complete");
        }
        Ok(())
    }

    /// Delivers one event to every projection, for callers that push events
    /// as they are appended instead of polling.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn process_event(&self, event: &EventEnvelope) -> Result<()> {
        let _guard = self.catch_up.lock().await;
        for projection in &self.projections {
            projection.handle(event).await?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<()> {
        {
            let _guard = self.catch_up.lock().await;
            for projection in &self.projections {
                projection.reset().await?;
            }
        }
        self.run_catch_up().await
    }
}
