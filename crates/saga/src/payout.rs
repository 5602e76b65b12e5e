//! Payout scheduling and manual settlement.

use common::AggregateId;
use domain::{Money, OrderStatus, SellerId};
use event_store::EventStore;
use projections::SellerPayout;
use serde::Serialize;
use uuid::Uuid;

use crate::coordinator::OrderSaga;
use crate::error::{Result, SagaError};
use crate::services::Notification;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PayoutRun {
    /// Orders whose return window closed this run.
    pub completed_orders: Vec<AggregateId>,
    /// Orders whose Transaction became eligible for payout.
    pub eligible: Vec<AggregateId>,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutBatch {
    pub batch_id: String,
    pub seller_id: SellerId,
    pub reference: String,
    pub orders: Vec<AggregateId>,
    pub total_net: Money,
}

/// Payouts wait while a return is open and never happen for refunded orders.
fn payout_allowed(status: OrderStatus) -> bool {
    matches!(
        status,
        OrderStatus::Delivered | OrderStatus::Completed | OrderStatus::ReturnRejected
    )
}

impl<S> OrderSaga<S>
where
    S: EventStore + Clone + 'static,
{
    /// Closes lapsed return windows, then promotes Transactions whose hold has ended.
    #[tracing::instrument(skip(self))]
    pub async fn run_payout_scheduler(&self) -> Result<PayoutRun> {
        self.refresh_views().await?;
        let now = self.now();
        let mut run = PayoutRun::default();

        for summary in self.directory.return_window_elapsed(now).await {
            let order_id = summary.order_id;
            match self.orders.close_return_window(order_id).await {
                Ok(result) if !result.events.is_empty() => run.completed_orders.push(order_id),
                Ok(_) => {}
                Err(e) => {
                    run.failures += 1;
                    tracing::warn!(%order_id, error = %e, "could not close return window");
                }
            }
        }

        self.refresh_views().await?;
        for entry in self.payouts.due_for_eligibility(now).await {
            let order_id = entry.order_id;
            let status = match self.directory.get(order_id).await {
                Some(summary) => summary.status,
                None => continue,
            };
            if !payout_allowed(status) {
                tracing::debug!(%order_id, %status, "payout held");
                continue;
            }
            match self.settlement.promote_eligible(order_id).await {
                Ok(result) if !result.events.is_empty() => run.eligible.push(order_id),
                Ok(_) => {}
                Err(e) => {
                    run.failures += 1;
                    tracing::warn!(%order_id, error = %e, "could not promote payout");
                }
            }
        }

        tracing::info!(
            completed = run.completed_orders.len(),
            eligible = run.eligible.len(),
            failures = run.failures,
            "payout scheduler finished"
        );
        Ok(run)
    }

    /// Eligible earnings grouped per seller. Listing has no side effects.
    pub async fn pending_payouts(&self) -> Result<Vec<SellerPayout>> {
        self.refresh_views().await?;
        Ok(self.payouts.pending_payouts().await)
    }

    /// Settles every eligible Transaction of one seller under a new batch id.
    #[tracing::instrument(skip(self))]
    pub async fn complete_payouts(&self, seller_id: SellerId, reference: &str) -> Result<PayoutBatch> {
        if reference.trim().is_empty() {
            return Err(SagaError::Validation("payout reference is required".to_string()));
        }
        self.refresh_views().await?;
        let pending = self
            .payouts
            .pending_for_seller(seller_id)
            .await
            .ok_or_else(|| SagaError::Validation(format!("no eligible payouts for seller {seller_id}")))?;

        let batch_id = format!("PB-{}", Uuid::new_v4().simple());
        let mut orders = Vec::with_capacity(pending.entries.len());
        let mut total_net = Money::zero();
        for entry in &pending.entries {
            match self
                .settlement
                .complete_payout(entry.order_id, &batch_id, reference)
                .await
            {
                Ok(_) => {
                    orders.push(entry.order_id);
                    total_net += entry.seller_net;
                }
                Err(e) => {
                    tracing::warn!(order_id = %entry.order_id, error = %e, "payout entry skipped");
                }
            }
        }
        if orders.is_empty() {
            return Err(SagaError::Validation(format!(
                "no eligible payouts for seller {seller_id}"
            )));
        }

        metrics::counter!("payouts_completed_total").increment(orders.len() as u64);
        tracing::info!(%seller_id, %batch_id, orders = orders.len(), %total_net, "payout batch completed");
        self.notify(Notification::PayoutCompleted {
            seller_id,
            batch_id: batch_id.clone(),
            amount: total_net,
            orders: orders.len(),
        })
        .await;
        self.refresh_views().await?;

        Ok(PayoutBatch {
            batch_id,
            seller_id,
            reference: reference.to_string(),
            orders,
            total_net,
        })
    }
}
