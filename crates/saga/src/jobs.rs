//! Deferred jobs: delayed follow-up transitions kept in an observable queue.
//!
//! The queue lives in memory and starts empty after a restart. Every job is
//! derivable from the event log, so `OrderSaga::resume_deferred_jobs`
//! rebuilds it from the order directory at startup and on each sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeferredJob {
    PromoteToProcessing { order_id: AggregateId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledJob {
    pub job_id: Uuid,
    pub due_at: DateTime<Utc>,
    pub job: DeferredJob,
}

#[derive(Debug, Clone, Default)]
pub struct DeferredJobs {
    queue: Arc<Mutex<Vec<ScheduledJob>>>,
}

impl DeferredJobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn schedule(&self, due_at: DateTime<Utc>, job: DeferredJob) -> Uuid {
        let job_id = Uuid::new_v4();
        let mut queue = self.queue.lock().await;
        queue.push(ScheduledJob {
            job_id,
            due_at,
            job,
        });
        queue.sort_by_key(|j| j.due_at);
        job_id
    }

    pub async fn contains(&self, job: &DeferredJob) -> bool {
        self.queue.lock().await.iter().any(|j| &j.job == job)
    }

    /// Returns whether the job was still queued.
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        let mut queue = self.queue.lock().await;
        let before = queue.len();
        queue.retain(|j| j.job_id != job_id);
        queue.len() != before
    }

    pub async fn pending(&self) -> Vec<ScheduledJob> {
        self.queue.lock().await.clone()
    }

    /// Removes and returns every job due at or before `now`, earliest first.
    pub async fn take_due(&self, now: DateTime<Utc>) -> Vec<ScheduledJob> {
        let mut queue = self.queue.lock().await;
        let split = queue.partition_point(|j| j.due_at <= now);
        queue.drain(..split).collect()
    }
}
