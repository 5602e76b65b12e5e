//! Compensation: cancels an order and undoes what its payment set in motion.
//!
//! Stock goes back only when the cancelling event says it was deducted, and
//! only the writer whose event was appended acts on it, so a second
//! compensation restores nothing. Refunds are claimed on the order before
//! the gateway is called; a refund the gateway did not accept stays pending
//! for the sweeper.

use common::AggregateId;
use domain::{
    Actor, Aggregate, CommandResult, DomainError, Order, OrderEvent, OrderStatus, RefundDue,
    TransactionStatus,
};
use event_store::EventStore;
use serde::Serialize;

use crate::coordinator::OrderSaga;
use crate::error::{Result, SagaError};
use crate::services::Notification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationOutcome {
    Compensated,
    /// The order was already cancelled; nothing was touched.
    AlreadyCompensated,
}

impl<S> OrderSaga<S>
where
    S: EventStore + Clone + 'static,
{
    /// Cancels the order, restores stock it holds, and refunds it if paid.
    /// Safe to call repeatedly.
    #[tracing::instrument(skip(self))]
    pub async fn compensate(&self, order_id: AggregateId, reason: &str) -> Result<CompensationOutcome> {
        let order = self.order(order_id).await?;
        if order.status() == OrderStatus::Cancelled {
            tracing::info!(%order_id, "order already compensated");
            return Ok(CompensationOutcome::AlreadyCompensated);
        }

        let result = match order.status() {
            OrderStatus::PaymentPending => {
                self.orders
                    .fail_payment(order_id, reason, Actor::System)
                    .await
            }
            OrderStatus::CancellationRequested => {
                self.orders
                    .approve_cancellation(order_id, Actor::System)
                    .await
            }
            _ => self.orders.cancel(order_id, reason, Actor::System).await,
        };

        match result {
            Ok(result) => {
                self.settle_cancellation(&result, reason).await;
                Ok(CompensationOutcome::Compensated)
            }
            Err(e) if e.is_conflict() => {
                // someone else moved the order first; see where it landed
                let current = self.order(order_id).await?;
                if current.status() == OrderStatus::Cancelled {
                    Ok(CompensationOutcome::AlreadyCompensated)
                } else {
                    Err(e.into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Side effects of a cancellation that has been appended.
    pub(crate) async fn settle_cancellation(&self, result: &CommandResult<Order>, reason: &str) {
        let order = &result.aggregate;
        let Some(order_id) = order.id() else {
            return;
        };

        for event in &result.events {
            match event {
                OrderEvent::OrderCancelled(data) => {
                    if data.stock_released {
                        self.release_lines(order_id, order.line_items()).await;
                    }
                    if let Some(refund) = &data.refund {
                        self.refund_paid_order(order_id, refund, reason).await;
                    }
                }
                OrderEvent::PaymentFailed(_) => self.refund_recorded_capture(order, reason).await,
                _ => continue,
            }

            metrics::counter!("compensations_total").increment(1);
            tracing::info!(%order_id, reason, "order compensated");
            self.clear_cart(order).await;
            if let (Some(buyer_id), Some(seller_id)) = (order.buyer_id(), order.seller_id()) {
                self.notify(Notification::OrderCancelled {
                    order_id,
                    buyer_id,
                    seller_id,
                    reason: reason.to_string(),
                })
                .await;
            }
        }
    }

    /// A paid order left the lifecycle: its Transaction is voided and the buyer refunded.
    pub(crate) async fn refund_paid_order(&self, order_id: AggregateId, refund: &RefundDue, reason: &str) {
        if let Err(e) = self.settlement.mark_refunded(order_id, reason).await {
            tracing::error!(%order_id, error = %e, "could not void transaction");
        }
        if let Err(e) = self.issue_refund(order_id).await {
            tracing::warn!(%order_id, amount = %refund.amount, error = %e, "refund deferred to sweeper");
        }
    }

    /// An unpaid order was failed after its payment had already been recorded
    /// (confirmation never landed). The Transaction is voided and the captured
    /// amount refunded through the order's refund obligation.
    pub(crate) async fn refund_recorded_capture(&self, order: &Order, reason: &str) {
        let Some(order_id) = order.id() else {
            return;
        };
        let txn = match self.settlement.transaction_for_order(order_id).await {
            Ok(Some(txn)) if txn.status() == TransactionStatus::Completed => txn,
            Ok(_) => return,
            Err(e) => {
                tracing::error!(%order_id, error = %e, "could not load transaction");
                return;
            }
        };

        let refund = RefundDue {
            amount: txn.amount(),
            payment_ref: txn.payment_ref().to_string(),
        };
        match self
            .orders
            .request_capture_refund(order_id, refund.clone(), reason)
            .await
        {
            Ok(requested) if !requested.events.is_empty() => {
                tracing::warn!(%order_id, payment_ref = %refund.payment_ref, "recorded payment never confirmed");
                self.notify(Notification::OperatorAlert {
                    order_id: Some(order_id),
                    message: format!(
                        "payment {} recorded but order not confirmed; refunding",
                        refund.payment_ref
                    ),
                })
                .await;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(%order_id, error = %e, "could not record refund obligation");
                return;
            }
        }
        self.refund_paid_order(order_id, &refund, reason).await;
    }

    /// Sends the order's outstanding refund to the gateway and records the
    /// reference. Returns the reference, or `None` when nothing is owed.
    #[tracing::instrument(skip(self))]
    pub async fn issue_refund(&self, order_id: AggregateId) -> Result<Option<String>> {
        let order = self.order(order_id).await?;
        let Some(refund) = order.refund() else {
            return Ok(None);
        };
        if let Some(refund_ref) = &refund.refund_ref {
            return Ok(Some(refund_ref.clone()));
        }

        let refund_ref = self
            .payments
            .refund(&refund.payment_ref, refund.amount)
            .await?;
        match self.orders.record_refund_initiated(order_id, &refund_ref).await {
            Ok(_) => {}
            Err(DomainError::Order(domain::OrderError::RefundAlreadyInitiated(existing))) => {
                self.notify(Notification::OperatorAlert {
                    order_id: Some(order_id),
                    message: format!(
                        "duplicate refund {refund_ref} issued; {existing} was already recorded"
                    ),
                })
                .await;
                return Ok(Some(existing));
            }
            Err(e) => return Err(SagaError::from(e)),
        }

        metrics::counter!("refunds_issued_total").increment(1);
        tracing::info!(%order_id, %refund_ref, amount = %refund.amount, "refund initiated");
        if let Some(buyer_id) = order.buyer_id() {
            self.notify(Notification::RefundInitiated {
                order_id,
                buyer_id,
                amount: refund.amount,
            })
            .await;
        }
        Ok(Some(refund_ref))
    }
}
