//! Payment verification: the one place a payment turns into reserved stock,
//! a Transaction and a confirmed order.
//!
//! Client callbacks and gateway webhooks may both arrive, in any order and
//! more than once. Each sibling order is claimed with a verification lease
//! appended under optimistic concurrency, so only one verifier reserves
//! stock for it; everyone else sees the claim and reports success.

use common::AggregateId;
use domain::{
    Actor, Aggregate, ConfirmPayment, DomainError, FeeRate, LineItem, Money, Order, OrderError,
    OrderStatus, PaymentStatus, RecordTransaction, RefundDue, transaction_id_for,
};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::coordinator::OrderSaga;
use crate::error::{InventoryError, PaymentError, Result, SagaError};
use crate::jobs::{DeferredJob, ScheduledJob};
use crate::services::inventory::lots_in;
use crate::services::{GatewayPaymentStatus, Notification, PaymentDetails};

/// Which siblings this call confirmed, found already handled, or failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    pub payment_intent_id: String,
    pub confirmed: Vec<AggregateId>,
    pub already_verified: Vec<AggregateId>,
    pub failed: Vec<AggregateId>,
}

impl VerificationOutcome {
    fn new(payment_intent_id: &str) -> Self {
        Self {
            payment_intent_id: payment_intent_id.to_string(),
            ..Self::default()
        }
    }
}

enum SiblingVerdict {
    Confirmed,
    AlreadyVerified,
    /// Money arrived for an order that had already been cancelled unpaid.
    LateCapture,
}

/// Gateway webhook body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentWebhook {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub payment_intent_id: Option<String>,
    pub payment_ref: Option<String>,
    pub refund_ref: Option<String>,
    pub amount: Option<Money>,
    pub reason: Option<String>,
}

impl WebhookPayload {
    fn require<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str> {
        field
            .as_deref()
            .ok_or_else(|| SagaError::Validation(format!("webhook payload is missing {name}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Verified(VerificationOutcome),
    Compensated { orders: Vec<AggregateId> },
    RefundCompleted { order_id: AggregateId },
    Ignored { event: String },
}

impl<S> OrderSaga<S>
where
    S: EventStore + Clone + 'static,
{
    /// Client-side confirmation that the buyer paid.
    #[tracing::instrument(skip(self, signature))]
    pub async fn verify_payment(
        &self,
        payment_intent_id: &str,
        payment_ref: &str,
        signature: &str,
    ) -> Result<VerificationOutcome> {
        if !self
            .signatures
            .verify_confirmation(payment_intent_id, payment_ref, signature)
        {
            metrics::counter!("payment_verification_failures_total", "reason" => "signature")
                .increment(1);
            return Err(PaymentError::InvalidSignature.into());
        }
        self.settle_captured_payment(payment_intent_id, payment_ref).await
    }

    /// Gateway webhook. The signature covers the raw body.
    #[tracing::instrument(skip(self, body, signature), fields(bytes = body.len()))]
    pub async fn handle_payment_webhook(&self, body: &[u8], signature: &str) -> Result<WebhookOutcome> {
        if !self.signatures.verify_body(body, signature) {
            metrics::counter!("payment_verification_failures_total", "reason" => "signature")
                .increment(1);
            return Err(PaymentError::InvalidSignature.into());
        }
        let webhook: PaymentWebhook = serde_json::from_slice(body)
            .map_err(|e| SagaError::Validation(format!("malformed webhook: {e}")))?;
        let payload = &webhook.payload;

        match webhook.event.as_str() {
            "payment.captured" => {
                let intent = WebhookPayload::require(&payload.payment_intent_id, "payment_intent_id")?;
                let payment_ref = WebhookPayload::require(&payload.payment_ref, "payment_ref")?;
                self.settle_captured_payment(intent, payment_ref)
                    .await
                    .map(WebhookOutcome::Verified)
            }
            "payment.failed" => {
                let intent = WebhookPayload::require(&payload.payment_intent_id, "payment_intent_id")?;
                let reason = payload.reason.as_deref().unwrap_or("payment failed");
                let orders = self.fail_unpaid_siblings(intent, reason).await?;
                Ok(WebhookOutcome::Compensated { orders })
            }
            "refund.processed" => {
                let intent = WebhookPayload::require(&payload.payment_intent_id, "payment_intent_id")?;
                let refund_ref = WebhookPayload::require(&payload.refund_ref, "refund_ref")?;
                let order_id = self
                    .complete_refund(intent, refund_ref, payload.payment_ref.as_deref(), payload.amount)
                    .await?;
                Ok(WebhookOutcome::RefundCompleted { order_id })
            }
            other => {
                tracing::info!(event = other, "ignoring payment webhook");
                Ok(WebhookOutcome::Ignored {
                    event: other.to_string(),
                })
            }
        }
    }

    async fn settle_captured_payment(
        &self,
        payment_intent_id: &str,
        payment_ref: &str,
    ) -> Result<VerificationOutcome> {
        metrics::counter!("payment_verifications_total").increment(1);
        let result = self.try_settle(payment_intent_id, payment_ref).await;
        if let Err(e) = &result {
            metrics::counter!("payment_verification_failures_total", "reason" => failure_reason(e))
                .increment(1);
            tracing::warn!(payment_intent_id, error = %e, "payment verification failed");
        }
        result
    }

    async fn try_settle(&self, payment_intent_id: &str, payment_ref: &str) -> Result<VerificationOutcome> {
        let siblings = self.orders.orders_for_intent(payment_intent_id).await?;
        if siblings.is_empty() {
            return Err(PaymentError::OrderNotFound(payment_intent_id.to_string()).into());
        }

        let mut outcome = VerificationOutcome::new(payment_intent_id);
        if siblings
            .iter()
            .all(|o| o.payment_status() == PaymentStatus::Paid)
        {
            outcome.already_verified = siblings.iter().filter_map(|o| o.id()).collect();
            return Ok(outcome);
        }

        let payments = &self.payments;
        let details = self
            .retry
            .run("fetch_payment_status", move || {
                payments.fetch_payment_status(payment_ref)
            })
            .await
            .map_err(|e| match e {
                e if e.is_transient() => PaymentError::GatewayUnavailable(e.to_string()).into(),
                other => other,
            })?;

        if details.payment_intent_id != payment_intent_id {
            return Err(SagaError::Validation(format!(
                "payment {payment_ref} does not belong to {payment_intent_id}"
            )));
        }
        if details.status != GatewayPaymentStatus::Captured {
            let reason = format!("payment {}", details.status);
            self.fail_unpaid_siblings(payment_intent_id, &reason).await?;
            return Err(PaymentError::NotCaptured {
                status: details.status.to_string(),
            }
            .into());
        }

        let fee_rate = self.settings.current_fee_rate().await?;
        let mut first_error = None;
        for order in &siblings {
            let Some(order_id) = order.id() else {
                continue;
            };
            match self.confirm_sibling(order, &details, fee_rate).await {
                Ok(SiblingVerdict::Confirmed) => outcome.confirmed.push(order_id),
                Ok(SiblingVerdict::AlreadyVerified) => outcome.already_verified.push(order_id),
                Ok(SiblingVerdict::LateCapture) => outcome.failed.push(order_id),
                Err(e) => {
                    tracing::warn!(%order_id, error = %e, "sibling not confirmed");
                    outcome.failed.push(order_id);
                    first_error.get_or_insert(e);
                }
            }
        }

        if outcome.confirmed.is_empty() && outcome.already_verified.is_empty() {
            return Err(first_error.unwrap_or_else(|| SagaError::OrderState {
                current_status: OrderStatus::Cancelled,
                reason: "the order was cancelled before payment completed; the payment will be refunded"
                    .to_string(),
            }));
        }
        Ok(outcome)
    }

    async fn confirm_sibling(
        &self,
        order: &Order,
        details: &PaymentDetails,
        fee_rate: FeeRate,
    ) -> Result<SiblingVerdict> {
        let (Some(order_id), Some(buyer_id), Some(seller_id)) =
            (order.id(), order.buyer_id(), order.seller_id())
        else {
            return Err(SagaError::Validation("order has not been placed".to_string()));
        };
        match order.status() {
            OrderStatus::PaymentPending => {}
            OrderStatus::Cancelled if order.confirmed_at().is_none() => {
                return self.refund_late_capture(order, details).await;
            }
            _ => return Ok(SiblingVerdict::AlreadyVerified),
        }

        match self
            .orders
            .begin_verification(order_id, &details.payment_ref, self.policy.verification_lease)
            .await
        {
            Ok(_) => {}
            Err(DomainError::Order(OrderError::VerificationInProgress { .. })) => {
                return Ok(SiblingVerdict::AlreadyVerified);
            }
            Err(DomainError::Order(OrderError::PaymentAlreadyResolved { .. })) => {
                let current = self.order(order_id).await?;
                if current.status() == OrderStatus::Cancelled && current.confirmed_at().is_none() {
                    return self.refund_late_capture(&current, details).await;
                }
                return Ok(SiblingVerdict::AlreadyVerified);
            }
            Err(e) if e.is_conflict() => return Ok(SiblingVerdict::AlreadyVerified),
            Err(e) => return Err(e.into()),
        }

        self.reserve_order_stock(order, details).await?;

        let recorded = self
            .settlement
            .record(RecordTransaction {
                order_id,
                buyer_id,
                seller_id,
                amount: order.grand_total(),
                fee_rate,
                payment_method: details.method.clone(),
                payment_ref: details.payment_ref.clone(),
            })
            .await;
        if let Err(e) = recorded {
            self.release_lines(order_id, order.line_items()).await;
            return Err(e.into());
        }

        let now = self.now();
        let confirmed = self
            .orders
            .confirm_payment(
                order_id,
                ConfirmPayment {
                    payment_ref: details.payment_ref.clone(),
                    payment_method: details.method.clone(),
                    transaction_id: transaction_id_for(order_id),
                    fee_rate,
                    confirmed_at: now,
                },
            )
            .await;
        if let Err(e) = confirmed {
            self.release_lines(order_id, order.line_items()).await;
            let current = self.order(order_id).await?;
            if current.status() == OrderStatus::Cancelled && current.confirmed_at().is_none() {
                // the lease ran out and the order was cancelled underneath us
                self.refund_recorded_capture(&current, "payment captured after cancellation")
                    .await;
                return Ok(SiblingVerdict::LateCapture);
            }
            if current.confirmed_at().is_some() {
                return Ok(SiblingVerdict::AlreadyVerified);
            }
            // still awaiting payment: the Transaction stays so a retry can confirm
            tracing::warn!(%order_id, error = %e, "payment recorded but confirmation failed");
            return Err(e.into());
        }

        tracing::info!(%order_id, payment_ref = %details.payment_ref, "order confirmed");
        self.clear_cart(order).await;
        self.notify(Notification::NewOrder {
            order_id,
            seller_id,
            grand_total: order.grand_total(),
        })
        .await;
        self.notify(Notification::PaymentReceived {
            order_id,
            buyer_id,
            amount: order.grand_total(),
        })
        .await;
        self.jobs
            .schedule(
                now + self.policy.processing_grace,
                DeferredJob::PromoteToProcessing { order_id },
            )
            .await;

        Ok(SiblingVerdict::Confirmed)
    }

    /// Reserves every line of one order. On a shortfall the lines already
    /// taken go back and the order is failed and refunded on its own.
    async fn reserve_order_stock(&self, order: &Order, details: &PaymentDetails) -> Result<()> {
        let order_id = order.id().unwrap_or_default();
        let mut reserved: Vec<LineItem> = Vec::new();

        for line in order.line_items() {
            match self.inventory.reserve(line.product_id, line.units()).await {
                Ok(_) => reserved.push(line.clone()),
                Err(e) => {
                    self.release_lines(order_id, &reserved).await;
                    let error = match e {
                        InventoryError::InsufficientStock {
                            product_id,
                            available,
                            ..
                        } => SagaError::InsufficientStock {
                            product_id,
                            available_lots: lots_in(available, line.lot_size),
                        },
                        other => other.into(),
                    };
                    self.fail_after_capture(order, details, &error).await;
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Stock ran out between checkout and payment: the order is cancelled as
    /// unpaid and its share of the captured money refunded.
    async fn fail_after_capture(&self, order: &Order, details: &PaymentDetails, error: &SagaError) {
        let Some(order_id) = order.id() else {
            return;
        };
        match self
            .orders
            .fail_payment(order_id, "stock unavailable at payment", Actor::System)
            .await
        {
            Ok(result) => self.settle_cancellation(&result, "stock unavailable at payment").await,
            Err(e) => tracing::error!(%order_id, error = %e, "could not fail order"),
        }

        let refund = RefundDue {
            amount: order.grand_total(),
            payment_ref: details.payment_ref.clone(),
        };
        if let Err(e) = self
            .orders
            .request_capture_refund(order_id, refund, "stock unavailable at payment")
            .await
        {
            tracing::error!(%order_id, error = %e, "could not record refund obligation");
        }
        if let Err(e) = self.issue_refund(order_id).await {
            tracing::warn!(%order_id, error = %e, "refund deferred to sweeper");
        }

        self.notify(Notification::OperatorAlert {
            order_id: Some(order_id),
            message: format!("order cancelled after payment: {error}"),
        })
        .await;
    }

    async fn refund_late_capture(&self, order: &Order, details: &PaymentDetails) -> Result<SiblingVerdict> {
        let order_id = order.id().unwrap_or_default();
        let refund = RefundDue {
            amount: order.grand_total(),
            payment_ref: details.payment_ref.clone(),
        };
        let requested = self
            .orders
            .request_capture_refund(order_id, refund, "payment captured after cancellation")
            .await?;

        if !requested.events.is_empty() {
            tracing::warn!(%order_id, "payment captured for a cancelled order");
            self.notify(Notification::OperatorAlert {
                order_id: Some(order_id),
                message: format!(
                    "payment {} captured after the order was cancelled; refunding",
                    details.payment_ref
                ),
            })
            .await;
        }
        if let Err(e) = self.issue_refund(order_id).await {
            tracing::warn!(%order_id, error = %e, "refund deferred to sweeper");
        }
        Ok(SiblingVerdict::LateCapture)
    }

    /// Compensates every sibling still waiting for payment.
    #[tracing::instrument(skip(self))]
    pub async fn fail_unpaid_siblings(&self, payment_intent_id: &str, reason: &str) -> Result<Vec<AggregateId>> {
        let siblings = self.orders.orders_for_intent(payment_intent_id).await?;
        if siblings.is_empty() {
            return Err(PaymentError::OrderNotFound(payment_intent_id.to_string()).into());
        }

        let mut compensated = Vec::new();
        for order in siblings
            .iter()
            .filter(|o| o.status() == OrderStatus::PaymentPending)
        {
            let Some(order_id) = order.id() else {
                continue;
            };
            match self.compensate(order_id, reason).await {
                Ok(_) => compensated.push(order_id),
                Err(e) => tracing::warn!(%order_id, error = %e, "compensation failed"),
            }
        }
        Ok(compensated)
    }

    /// Gateway confirmed a refund. Matched by refund reference, or by payment
    /// reference when the webhook beat the reference being recorded.
    #[tracing::instrument(skip(self))]
    pub async fn complete_refund(
        &self,
        payment_intent_id: &str,
        refund_ref: &str,
        payment_ref: Option<&str>,
        amount: Option<Money>,
    ) -> Result<AggregateId> {
        let siblings = self.orders.orders_for_intent(payment_intent_id).await?;
        let by_ref = siblings.iter().find(|o| {
            o.refund()
                .is_some_and(|r| r.refund_ref.as_deref() == Some(refund_ref))
        });
        let order = by_ref
            .or_else(|| {
                siblings.iter().find(|o| {
                    o.refund().is_some_and(|r| {
                        r.refund_ref.is_none() && payment_ref.is_some_and(|p| p == r.payment_ref)
                    })
                })
            })
            .ok_or_else(|| PaymentError::OrderNotFound(payment_intent_id.to_string()))?;

        let order_id = order.id().unwrap_or_default();
        let amount = amount
            .or_else(|| order.refund().map(|r| r.amount))
            .unwrap_or_default();
        self.orders.complete_refund(order_id, refund_ref, amount).await?;
        tracing::info!(%order_id, refund_ref, %amount, "refund completed");
        Ok(order_id)
    }

    /// Queues the promotion of every confirmed order that has none queued,
    /// due at its confirmation plus the grace delay. Recovers the jobs an
    /// empty queue lost across a restart, or a promotion dropped on error.
    #[tracing::instrument(skip(self))]
    pub async fn resume_deferred_jobs(&self) -> Result<usize> {
        self.refresh_views().await?;
        let mut resumed = 0;
        for summary in self.directory.awaiting_processing().await {
            let Some(confirmed_at) = summary.confirmed_at else {
                continue;
            };
            let job = DeferredJob::PromoteToProcessing {
                order_id: summary.order_id,
            };
            if self.jobs.contains(&job).await {
                continue;
            }
            self.jobs
                .schedule(confirmed_at + self.policy.processing_grace, job)
                .await;
            resumed += 1;
        }
        if resumed > 0 {
            tracing::info!(resumed, "deferred promotions re-queued");
        }
        Ok(resumed)
    }

    /// Runs deferred jobs that are due. A job that no longer applies is dropped.
    pub async fn run_due_jobs(&self) -> usize {
        let due = self.jobs.take_due(self.now()).await;
        let count = due.len();
        for ScheduledJob { job_id, job, .. } in due {
            match job {
                DeferredJob::PromoteToProcessing { order_id } => {
                    match self.orders.start_processing(order_id).await {
                        Ok(_) => tracing::debug!(%order_id, "order moved to processing"),
                        Err(e) => {
                            tracing::info!(%job_id, %order_id, error = %e, "deferred promotion dropped")
                        }
                    }
                }
            }
        }
        count
    }
}

fn failure_reason(error: &SagaError) -> &'static str {
    match error {
        SagaError::InsufficientStock { .. } => "insufficient_stock",
        SagaError::Payment(PaymentError::NotCaptured { .. }) => "not_captured",
        SagaError::Payment(PaymentError::OrderNotFound(_)) => "order_not_found",
        SagaError::Payment(PaymentError::GatewayUnavailable(_)) => "gateway_unavailable",
        SagaError::Payment(PaymentError::InvalidSignature) => "signature",
        _ => "other",
    }
}
