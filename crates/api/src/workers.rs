//! Background loops driving the time-based parts of the lifecycle.
//!
//! Each worker returns its `JoinHandle`; the loops run until the runtime
//! shuts down. Errors are logged and the next tick tries again.

use std::sync::Arc;
use std::time::Duration;

use event_store::EventStore;
use saga::OrderSaga;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Deferred jobs are short and due on a seconds scale.
const JOB_POLL_INTERVAL: Duration = Duration::from_secs(1);

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Abandons unpaid checkouts and retries refunds the gateway refused.
pub fn start_sweeper<S>(saga: Arc<OrderSaga<S>>, period: Duration) -> JoinHandle<()>
where
    S: EventStore + Clone + 'static,
{
    tokio::spawn(async move {
        let mut timer = ticker(period);
        tracing::info!(period_secs = period.as_secs(), "abandoned-checkout sweeper started");
        loop {
            timer.tick().await;
            match saga.sweep_abandoned().await {
                Ok(report)
                    if !report.abandoned.is_empty()
                        || report.refunds_issued > 0
                        || report.promotions_resumed > 0 =>
                {
                    tracing::info!(
                        abandoned = report.abandoned.len(),
                        refunds = report.refunds_issued,
                        promotions = report.promotions_resumed,
                        "sweep applied"
                    );
                }
                Ok(_) => tracing::debug!("sweep found nothing to do"),
                Err(e) => tracing::error!(error = %e, "sweep failed"),
            }
        }
    })
}

/// Closes lapsed return windows and promotes payouts past their hold.
pub fn start_payout_scheduler<S>(saga: Arc<OrderSaga<S>>, period: Duration) -> JoinHandle<()>
where
    S: EventStore + Clone + 'static,
{
    tokio::spawn(async move {
        let mut timer = ticker(period);
        tracing::info!(period_secs = period.as_secs(), "payout scheduler started");
        loop {
            timer.tick().await;
            match saga.run_payout_scheduler().await {
                Ok(run) => tracing::debug!(
                    completed = run.completed_orders.len(),
                    eligible = run.eligible.len(),
                    failures = run.failures,
                    "payout scheduler ran"
                ),
                Err(e) => tracing::error!(error = %e, "payout scheduler failed"),
            }
        }
    })
}

/// Runs deferred jobs as they fall due.
pub fn start_job_runner<S>(saga: Arc<OrderSaga<S>>) -> JoinHandle<()>
where
    S: EventStore + Clone + 'static,
{
    tokio::spawn(async move {
        let mut timer = ticker(JOB_POLL_INTERVAL);
        loop {
            timer.tick().await;
            let ran = saga.run_due_jobs().await;
            if ran > 0 {
                tracing::debug!(ran, "deferred jobs ran");
            }
        }
    })
}
