//! Abandoned-checkout sweeper.
//!
//! Each run cancels unpaid orders older than the checkout timeout, retries
//! refunds the gateway has not accepted yet and re-queues lost promotions. One order's failure is
//! logged and left for the next run; the sweep carries on.

use common::AggregateId;
use domain::{Actor, EventContext};
use event_store::EventStore;
use serde::Serialize;

use crate::coordinator::OrderSaga;
use crate::error::Result;

const ABANDONED: &str = "abandoned checkout";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub abandoned: Vec<AggregateId>,
    /// Held by a live verification, or resolved since the view was read.
    pub skipped: Vec<AggregateId>,
    pub refunds_issued: usize,
    pub promotions_resumed: usize,
    pub failures: usize,
}

impl<S> OrderSaga<S>
where
    S: EventStore + Clone + 'static,
{
    #[tracing::instrument(skip(self))]
    pub async fn sweep_abandoned(&self) -> Result<SweepReport> {
        metrics::counter!("sweeper_runs_total").increment(1);
        self.refresh_views().await?;

        let now = self.now();
        let cutoff = now - self.policy.checkout_timeout;
        let mut report = SweepReport::default();

        for summary in self.directory.awaiting_payment_since(cutoff).await {
            let order_id = summary.order_id;
            match self.abandon(order_id).await {
                Ok(true) => report.abandoned.push(order_id),
                Ok(false) => report.skipped.push(order_id),
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!(%order_id, error = %e, "abandonment failed; retrying next run");
                }
            }
        }

        for summary in self.directory.refunds_pending().await {
            let order_id = summary.order_id;
            match self.issue_refund(order_id).await {
                Ok(Some(_)) => report.refunds_issued += 1,
                Ok(None) => {}
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!(%order_id, error = %e, "refund retry failed");
                }
            }
        }

        match self.resume_deferred_jobs().await {
            Ok(resumed) => report.promotions_resumed = resumed,
            Err(e) => {
                report.failures += 1;
                tracing::warn!(error = %e, "could not re-queue deferred promotions");
            }
        }

        tracing::info!(
            abandoned = report.abandoned.len(),
            skipped = report.skipped.len(),
            refunds = report.refunds_issued,
            promotions = report.promotions_resumed,
            failures = report.failures,
            "sweep finished"
        );
        Ok(report)
    }

    /// Fails an unpaid order unless a verification holds it. The lease is
    /// checked inside the command, so a verifier that claims the order
    /// concurrently makes this append conflict instead of both proceeding.
    async fn abandon(&self, order_id: AggregateId) -> Result<bool> {
        let now = self.now();
        let result = self
            .orders
            .handler()
            .execute_with(order_id, EventContext::at(now), |order| {
                if order.is_verification_in_progress(now)
                    || order.status() != domain::OrderStatus::PaymentPending
                {
                    return Ok(vec![]);
                }
                order.fail_payment(ABANDONED, Actor::System, now)
            })
            .await?;

        if result.events.is_empty() {
            return Ok(false);
        }
        self.settle_cancellation(&result, ABANDONED).await;
        Ok(true)
    }
}
