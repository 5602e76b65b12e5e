//! Order aggregate implementation.

use chrono::{DateTime, Duration, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{
    Actor, BuyerId, CartId, ConfirmPayment, FeeRate, LineItem, Money, OrderError, OrderEvent,
    OrderStatus, PaymentStatus, PlaceOrder, RefundDue, SellerId, ShipmentDetails,
    events::*,
};

/// One line of the audit trail. Appended, never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub timestamp: DateTime<Utc>,
    pub note: Option<String>,
    pub actor_id: String,
}

/// A pending or answered cancellation or return request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub reason: String,
    pub requested_by: Actor,
    pub requested_at: DateTime<Utc>,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundObligation {
    pub amount: Money,
    pub payment_ref: String,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    /// Set once the gateway accepted the refund.
    pub refund_ref: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,
    #[serde(default)]
    version: Version,

    buyer_id: Option<BuyerId>,
    seller_id: Option<SellerId>,
    cart_id: Option<CartId>,
    payment_intent_id: String,
    line_items: Vec<LineItem>,

    subtotal: Money,
    shipping_fee: Money,
    grand_total: Money,
    platform_fee: Option<Money>,
    platform_fee_rate: Option<FeeRate>,
    seller_net: Option<Money>,

    status: OrderStatus,
    payment_status: PaymentStatus,
    payment_ref: Option<String>,
    payment_method: Option<String>,
    transaction_id: Option<AggregateId>,
    stock_deducted: bool,
    verification_lease_until: Option<DateTime<Utc>>,

    placed_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    shipment: Option<ShipmentDetails>,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    return_window_expires_at: Option<DateTime<Utc>>,
    pickup_scheduled_at: Option<DateTime<Utc>>,
    cancellation: Option<RequestInfo>,
    return_request: Option<RequestInfo>,
    refund: Option<RefundObligation>,

    history: Vec<StatusEntry>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        let before = (self.status, self.payment_status);

        let (at, note, actor) = match event {
            OrderEvent::OrderPlaced(data) => {
                let at = data.placed_at;
                self.id = Some(data.order_id);
                self.buyer_id = Some(data.buyer_id);
                self.seller_id = Some(data.seller_id);
                self.cart_id = data.cart_id;
                self.payment_intent_id = data.payment_intent_id;
                self.line_items = data.line_items;
                self.subtotal = data.subtotal;
                self.shipping_fee = data.shipping_fee;
                self.grand_total = data.grand_total;
                self.placed_at = Some(at);
                self.status = OrderStatus::PaymentPending;
                self.payment_status = PaymentStatus::Pending;
                self.history.push(StatusEntry {
                    status: self.status,
                    payment_status: self.payment_status,
                    timestamp: at,
                    note: Some("Order placed".to_string()),
                    actor_id: data.buyer_id.to_string(),
                });
                return;
            }
            OrderEvent::PaymentVerificationStarted(data) => {
                self.verification_lease_until = Some(data.lease_expires_at);
                return;
            }
            OrderEvent::PaymentConfirmed(data) => {
                self.status = OrderStatus::Confirmed;
                self.payment_status = PaymentStatus::Paid;
                self.stock_deducted = true;
                self.verification_lease_until = None;
                self.payment_ref = Some(data.payment_ref);
                self.payment_method = Some(data.payment_method);
                self.transaction_id = Some(data.transaction_id);
                self.platform_fee_rate = Some(data.platform_fee_rate);
                self.platform_fee = Some(data.platform_fee);
                self.seller_net = Some(data.seller_net);
                self.confirmed_at = Some(data.confirmed_at);
                (data.confirmed_at, Some("Payment verified".to_string()), Actor::PaymentGateway)
            }
            OrderEvent::PaymentFailed(data) => {
                self.status = OrderStatus::Cancelled;
                self.payment_status = PaymentStatus::Failed;
                self.verification_lease_until = None;
                (data.failed_at, Some(data.reason), data.actor)
            }
            OrderEvent::ProcessingStarted(data) => {
                self.status = OrderStatus::Processing;
                (data.started_at, None, Actor::System)
            }
            OrderEvent::OrderPacked(data) => {
                self.status = OrderStatus::Packed;
                (data.at, data.note, data.actor)
            }
            OrderEvent::CancellationRequested(data) => {
                self.status = OrderStatus::CancellationRequested;
                self.cancellation = Some(RequestInfo {
                    reason: data.reason.clone(),
                    requested_by: data.actor.clone(),
                    requested_at: data.at,
                    images: Vec::new(),
                });
                (data.at, Some(data.reason), data.actor)
            }
            OrderEvent::CancellationRejected(data) => {
                self.status = OrderStatus::Packed;
                (data.at, Some(data.reason), data.actor)
            }
            OrderEvent::OrderCancelled(data) => {
                self.status = OrderStatus::Cancelled;
                self.verification_lease_until = None;
                if data.stock_released {
                    self.stock_deducted = false;
                }
                match data.refund {
                    Some(refund) => {
                        self.payment_status = PaymentStatus::RefundProcessing;
                        self.refund = Some(obligation(refund, &data.reason, data.cancelled_at));
                    }
                    None if self.payment_status == PaymentStatus::Pending => {
                        self.payment_status = PaymentStatus::Failed;
                    }
                    None => {}
                }
                if self.cancellation.is_none() {
                    self.cancellation = Some(RequestInfo {
                        reason: data.reason.clone(),
                        requested_by: data.actor.clone(),
                        requested_at: data.cancelled_at,
                        images: Vec::new(),
                    });
                }
                (data.cancelled_at, Some(data.reason), data.actor)
            }
            OrderEvent::OrderShipped(data) => {
                self.status = OrderStatus::Shipped;
                self.shipment = Some(data.shipment);
                self.shipped_at = Some(data.shipped_at);
                (data.shipped_at, None, data.actor)
            }
            OrderEvent::ShipmentStatusUpdated(data) => {
                self.status = data.status;
                (data.at, Some(data.carrier_status), Actor::Carrier)
            }
            OrderEvent::OrderDelivered(data) => {
                self.status = OrderStatus::Delivered;
                self.delivered_at = Some(data.delivered_at);
                self.return_window_expires_at = Some(data.return_window_expires_at);
                (data.delivered_at, None, data.actor)
            }
            OrderEvent::ReturnRequested(data) => {
                self.status = OrderStatus::ReturnRequested;
                self.return_request = Some(RequestInfo {
                    reason: data.reason.clone(),
                    requested_by: data.actor.clone(),
                    requested_at: data.requested_at,
                    images: data.images,
                });
                (data.requested_at, Some(data.reason), data.actor)
            }
            OrderEvent::ReturnApproved(data) => {
                self.status = OrderStatus::ReturnApproved;
                self.pickup_scheduled_at = data.pickup_scheduled_at;
                (data.approved_at, None, data.actor)
            }
            OrderEvent::ReturnRejected(data) => {
                self.status = OrderStatus::ReturnRejected;
                (data.at, Some(data.reason), data.actor)
            }
            OrderEvent::OrderReturned(data) => {
                self.status = OrderStatus::Returned;
                if data.stock_released {
                    self.stock_deducted = false;
                }
                if let Some(refund) = data.refund {
                    self.payment_status = PaymentStatus::RefundProcessing;
                    self.refund = Some(obligation(refund, "returned", data.returned_at));
                }
                (data.returned_at, None, data.actor)
            }
            OrderEvent::CaptureRefundRequested(data) => {
                self.refund = Some(obligation(data.refund, &data.reason, data.at));
                return;
            }
            OrderEvent::RefundInitiated(data) => {
                if let Some(refund) = self.refund.as_mut() {
                    refund.refund_ref = Some(data.refund_ref);
                }
                return;
            }
            OrderEvent::RefundCompleted(data) => {
                let partial = self
                    .refund
                    .as_ref()
                    .is_some_and(|r| data.amount < r.amount);
                if let Some(refund) = self.refund.as_mut() {
                    refund.refund_ref.get_or_insert(data.refund_ref);
                    refund.completed_at = Some(data.at);
                }
                self.payment_status = if partial {
                    PaymentStatus::PartiallyRefunded
                } else {
                    PaymentStatus::Refunded
                };
                if self.status == OrderStatus::Returned {
                    self.status = OrderStatus::Refunded;
                }
                (data.at, Some("Refund completed".to_string()), Actor::PaymentGateway)
            }
            OrderEvent::OrderCompleted(data) => {
                self.status = OrderStatus::Completed;
                (data.at, data.note, data.actor)
            }
        };

        if (self.status, self.payment_status) != before {
            self.history.push(StatusEntry {
                status: self.status,
                payment_status: self.payment_status,
                timestamp: at,
                note,
                actor_id: actor.actor_id(),
            });
        }
    }
}

fn obligation(refund: RefundDue, reason: &str, at: DateTime<Utc>) -> RefundObligation {
    RefundObligation {
        amount: refund.amount,
        payment_ref: refund.payment_ref,
        reason: reason.to_string(),
        requested_at: at,
        refund_ref: None,
        completed_at: None,
    }
}

// Query methods
impl Order {
    pub fn buyer_id(&self) -> Option<BuyerId> {
        self.buyer_id
    }

    pub fn seller_id(&self) -> Option<SellerId> {
        self.seller_id
    }

    pub fn cart_id(&self) -> Option<CartId> {
        self.cart_id
    }

    pub fn payment_intent_id(&self) -> &str {
        &self.payment_intent_id
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn shipping_fee(&self) -> Money {
        self.shipping_fee
    }

    pub fn grand_total(&self) -> Money {
        self.grand_total
    }

    pub fn platform_fee(&self) -> Option<Money> {
        self.platform_fee
    }

    pub fn platform_fee_rate(&self) -> Option<FeeRate> {
        self.platform_fee_rate
    }

    pub fn seller_net(&self) -> Option<Money> {
        self.seller_net
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn payment_ref(&self) -> Option<&str> {
        self.payment_ref.as_deref()
    }

    pub fn payment_method(&self) -> Option<&str> {
        self.payment_method.as_deref()
    }

    pub fn transaction_id(&self) -> Option<AggregateId> {
        self.transaction_id
    }

    pub fn stock_deducted(&self) -> bool {
        self.stock_deducted
    }

    pub fn can_cancel(&self) -> bool {
        self.status.can_cancel()
    }

    pub fn can_return(&self) -> bool {
        self.status.can_return()
    }

    /// A verifier holds the order until this instant.
    pub fn verification_lease_until(&self) -> Option<DateTime<Utc>> {
        self.verification_lease_until
    }

    pub fn is_verification_in_progress(&self, now: DateTime<Utc>) -> bool {
        self.verification_lease_until.is_some_and(|until| until > now)
    }

    pub fn placed_at(&self) -> Option<DateTime<Utc>> {
        self.placed_at
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    pub fn shipment(&self) -> Option<&ShipmentDetails> {
        self.shipment.as_ref()
    }

    pub fn shipped_at(&self) -> Option<DateTime<Utc>> {
        self.shipped_at
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    pub fn return_window_expires_at(&self) -> Option<DateTime<Utc>> {
        self.return_window_expires_at
    }

    pub fn pickup_scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.pickup_scheduled_at
    }

    pub fn cancellation(&self) -> Option<&RequestInfo> {
        self.cancellation.as_ref()
    }

    pub fn return_request(&self) -> Option<&RequestInfo> {
        self.return_request.as_ref()
    }

    pub fn refund(&self) -> Option<&RefundObligation> {
        self.refund.as_ref()
    }

    /// A refund is owed but the gateway has not accepted it yet.
    pub fn refund_pending(&self) -> bool {
        self.refund.as_ref().is_some_and(|r| r.refund_ref.is_none())
    }

    pub fn history(&self) -> &[StatusEntry] {
        &self.history
    }

    pub fn is_placed(&self) -> bool {
        self.id.is_some()
    }

    fn refund_due(&self) -> Option<RefundDue> {
        if self.payment_status != PaymentStatus::Paid {
            return None;
        }
        Some(RefundDue {
            amount: self.grand_total,
            payment_ref: self.payment_ref.clone().unwrap_or_default(),
        })
    }
}

// Command methods (return events)
impl Order {
    fn ensure_placed(&self) -> Result<(), OrderError> {
        if self.is_placed() {
            Ok(())
        } else {
            Err(OrderError::NotPlaced)
        }
    }

    fn ensure_transition(&self, to: OrderStatus) -> Result<(), OrderError> {
        self.ensure_placed()?;
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(OrderError::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }

    pub fn place(&self, cmd: PlaceOrder) -> Result<Vec<OrderEvent>, OrderError> {
        if self.is_placed() {
            return Err(OrderError::AlreadyPlaced);
        }
        if cmd.line_items.is_empty() {
            return Err(OrderError::NoLineItems);
        }
        for line in &cmd.line_items {
            if line.lot_quantity == 0 || line.lot_size == 0 {
                return Err(OrderError::InvalidLineItem(format!(
                    "product {} must have a positive lot quantity and lot size",
                    line.product_id
                )));
            }
            if line.unit_price.cents() < 0 {
                return Err(OrderError::InvalidLineItem(format!(
                    "product {} has a negative price",
                    line.product_id
                )));
            }
        }
        if cmd.shipping_fee.cents() < 0 {
            return Err(OrderError::InvalidLineItem(
                "shipping fee cannot be negative".to_string(),
            ));
        }

        let subtotal: Money = cmd.line_items.iter().map(|l| l.line_total).sum();
        Ok(vec![OrderEvent::OrderPlaced(OrderPlacedData {
            order_id: cmd.order_id,
            buyer_id: cmd.buyer_id,
            seller_id: cmd.seller_id,
            cart_id: cmd.cart_id,
            payment_intent_id: cmd.payment_intent_id,
            line_items: cmd.line_items,
            subtotal,
            shipping_fee: cmd.shipping_fee,
            grand_total: subtotal + cmd.shipping_fee,
            placed_at: cmd.placed_at,
        })])
    }

    /// Claims the order for one verifier until `now + lease`.
    pub fn begin_verification(
        &self,
        payment_ref: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        if self.status != OrderStatus::PaymentPending {
            return Err(OrderError::PaymentAlreadyResolved {
                status: self.status,
                payment_status: self.payment_status,
            });
        }
        if let Some(until) = self.verification_lease_until
            && until > now
        {
            return Err(OrderError::VerificationInProgress { until });
        }

        Ok(vec![OrderEvent::PaymentVerificationStarted(
            VerificationStartedData {
                payment_ref: payment_ref.to_string(),
                started_at: now,
                lease_expires_at: now + lease,
            },
        )])
    }

    pub fn confirm_payment(&self, cmd: ConfirmPayment) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_transition(OrderStatus::Confirmed)?;
        if self.stock_deducted {
            return Err(OrderError::StockAlreadyDeducted);
        }

        let platform_fee = cmd.fee_rate.fee_for(self.grand_total);
        Ok(vec![OrderEvent::PaymentConfirmed(PaymentConfirmedData {
            payment_ref: cmd.payment_ref,
            payment_method: cmd.payment_method,
            transaction_id: cmd.transaction_id,
            platform_fee_rate: cmd.fee_rate,
            platform_fee,
            seller_net: self.grand_total - platform_fee,
            confirmed_at: cmd.confirmed_at,
        })])
    }

    /// Payment never arrived, was declined, or stock ran out before it could be reserved.
    pub fn fail_payment(
        &self,
        reason: impl Into<String>,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        if self.status != OrderStatus::PaymentPending {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: OrderStatus::Cancelled,
            });
        }

        Ok(vec![OrderEvent::PaymentFailed(PaymentFailedData {
            reason: reason.into(),
            failed_at: now,
            actor,
        })])
    }

    pub fn start_processing(&self, now: DateTime<Utc>) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_transition(OrderStatus::Processing)?;
        Ok(vec![OrderEvent::ProcessingStarted(ProcessingStartedData {
            started_at: now,
        })])
    }

    pub fn pack(&self, actor: Actor, now: DateTime<Utc>) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_transition(OrderStatus::Packed)?;
        Ok(vec![OrderEvent::OrderPacked(ActionData {
            actor,
            at: now,
            note: None,
        })])
    }

    /// Cancels immediately, releasing stock and raising a refund if paid.
    pub fn cancel(
        &self,
        reason: impl Into<String>,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        if let Some(reason) = self.status.cancel_refusal() {
            return Err(OrderError::CancellationNotAllowed {
                status: self.status,
                reason,
            });
        }

        Ok(vec![self.cancelled_event(reason.into(), actor, now)])
    }

    fn cancelled_event(&self, reason: String, actor: Actor, now: DateTime<Utc>) -> OrderEvent {
        OrderEvent::OrderCancelled(OrderCancelledData {
            reason,
            actor,
            cancelled_at: now,
            stock_released: self.stock_deducted,
            refund: self.refund_due(),
        })
    }

    /// A buyer's cancellation: immediate before packing, by approval after.
    pub fn request_cancellation(
        &self,
        reason: impl Into<String>,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        if !self.status.cancel_needs_approval() {
            return self.cancel(reason, actor, now);
        }

        Ok(vec![OrderEvent::CancellationRequested(ReasonData {
            reason: reason.into(),
            actor,
            at: now,
        })])
    }

    pub fn approve_cancellation(
        &self,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        if self.status != OrderStatus::CancellationRequested {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: OrderStatus::Cancelled,
            });
        }

        let reason = self
            .cancellation
            .as_ref()
            .map(|c| c.reason.clone())
            .unwrap_or_default();
        Ok(vec![self.cancelled_event(reason, actor, now)])
    }

    pub fn reject_cancellation(
        &self,
        reason: impl Into<String>,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.status != OrderStatus::CancellationRequested {
            self.ensure_placed()?;
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: OrderStatus::Packed,
            });
        }

        Ok(vec![OrderEvent::CancellationRejected(ReasonData {
            reason: reason.into(),
            actor,
            at: now,
        })])
    }

    pub fn ship(
        &self,
        shipment: ShipmentDetails,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_transition(OrderStatus::Shipped)?;
        if shipment.awb_code.trim().is_empty() {
            return Err(OrderError::MissingCarrierCode);
        }

        Ok(vec![OrderEvent::OrderShipped(OrderShippedData {
            shipment,
            actor,
            shipped_at: now,
        })])
    }

    /// Records carrier progress. Repeats of the current status are ignored.
    pub fn update_shipment_status(
        &self,
        status: OrderStatus,
        carrier_status: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if !matches!(
            status,
            OrderStatus::InTransit | OrderStatus::OutForDelivery | OrderStatus::DeliveryFailed
        ) {
            return Err(OrderError::NotAShipmentUpdate(status));
        }
        if self.status == status {
            return Ok(vec![]);
        }
        self.ensure_transition(status)?;

        Ok(vec![OrderEvent::ShipmentStatusUpdated(
            ShipmentStatusUpdatedData {
                status,
                carrier_status: carrier_status.into(),
                at: now,
            },
        )])
    }

    /// Opens the return window. Repeated delivery notices are ignored.
    pub fn deliver(
        &self,
        actor: Actor,
        now: DateTime<Utc>,
        return_window: Duration,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.status == OrderStatus::Delivered {
            return Ok(vec![]);
        }
        self.ensure_transition(OrderStatus::Delivered)?;

        Ok(vec![OrderEvent::OrderDelivered(OrderDeliveredData {
            delivered_at: now,
            return_window_expires_at: now + return_window,
            actor,
        })])
    }

    pub fn request_return(
        &self,
        reason: impl Into<String>,
        images: Vec<String>,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        if let Some(reason) = self.status.return_refusal() {
            return Err(OrderError::ReturnNotAllowed {
                status: self.status,
                reason,
            });
        }
        if let Some(expired_at) = self.return_window_expires_at
            && now > expired_at
        {
            return Err(OrderError::ReturnWindowExpired { expired_at });
        }

        Ok(vec![OrderEvent::ReturnRequested(ReturnRequestedData {
            reason: reason.into(),
            images,
            actor,
            requested_at: now,
        })])
    }

    pub fn approve_return(
        &self,
        pickup_scheduled_at: Option<DateTime<Utc>>,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_transition(OrderStatus::ReturnApproved)?;
        Ok(vec![OrderEvent::ReturnApproved(ReturnApprovedData {
            pickup_scheduled_at,
            actor,
            approved_at: now,
        })])
    }

    pub fn reject_return(
        &self,
        reason: impl Into<String>,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_transition(OrderStatus::ReturnRejected)?;
        Ok(vec![OrderEvent::ReturnRejected(ReasonData {
            reason: reason.into(),
            actor,
            at: now,
        })])
    }

    /// Goods are back with the seller, after an approved return or a failed delivery.
    pub fn mark_returned(
        &self,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_transition(OrderStatus::Returned)?;
        Ok(vec![OrderEvent::OrderReturned(OrderReturnedData {
            returned_at: now,
            stock_released: self.stock_deducted,
            refund: self.refund_due(),
            actor,
        })])
    }

    /// Closes the order once its return window has lapsed. A no-op before then.
    pub fn close_return_window(&self, now: DateTime<Utc>) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_transition(OrderStatus::Completed)?;
        match self.return_window_expires_at {
            Some(expires_at) if now > expires_at => {
                Ok(vec![OrderEvent::OrderCompleted(ActionData {
                    actor: Actor::System,
                    at: now,
                    note: Some("Return window closed".to_string()),
                })])
            }
            _ => Ok(vec![]),
        }
    }

    /// Records that captured money must go back for an order that never became paid.
    /// Idempotent: an existing obligation is left alone.
    pub fn request_capture_refund(
        &self,
        refund: RefundDue,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        if self.refund.is_some() {
            return Ok(vec![]);
        }
        if self.payment_status == PaymentStatus::Paid {
            return Err(OrderError::PaymentAlreadyResolved {
                status: self.status,
                payment_status: self.payment_status,
            });
        }

        Ok(vec![OrderEvent::CaptureRefundRequested(CaptureRefundData {
            refund,
            reason: reason.into(),
            at: now,
        })])
    }

    pub fn record_refund_initiated(
        &self,
        refund_ref: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        let refund_ref = refund_ref.into();
        match self.refund.as_ref() {
            None => Err(OrderError::NoRefundOwed),
            Some(r) if r.refund_ref.as_deref() == Some(refund_ref.as_str()) => Ok(vec![]),
            Some(RefundObligation {
                refund_ref: Some(existing),
                ..
            }) => Err(OrderError::RefundAlreadyInitiated(existing.clone())),
            Some(_) => Ok(vec![OrderEvent::RefundInitiated(RefundInitiatedData {
                refund_ref,
                at: now,
            })]),
        }
    }

    /// Gateway confirmed the refund. Duplicate confirmations are ignored.
    pub fn complete_refund(
        &self,
        refund_ref: impl Into<String>,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        let Some(refund) = self.refund.as_ref() else {
            return Err(OrderError::NoRefundOwed);
        };
        if refund.completed_at.is_some() {
            return Ok(vec![]);
        }

        Ok(vec![OrderEvent::RefundCompleted(RefundCompletedData {
            refund_ref: refund_ref.into(),
            amount,
            at: now,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::ProductId;

    fn now() -> DateTime<Utc> {
        "2026-03-01T10:00:00Z".parse().unwrap()
    }

    fn with(mut order: Order, events: Vec<OrderEvent>) -> Order {
        order.apply_events(events);
        order
    }

    fn placed() -> Order {
        let cmd = PlaceOrder {
            order_id: AggregateId::new(),
            buyer_id: BuyerId::new(),
            seller_id: SellerId::new(),
            cart_id: None,
            payment_intent_id: "pi_1".to_string(),
            line_items: vec![LineItem::new(ProductId::new(), 2, 5, Money::from_cents(100))],
            shipping_fee: Money::from_cents(50),
            placed_at: now(),
        };
        let order = Order::default();
        let events = order.place(cmd).unwrap();
        with(order, events)
    }

    fn confirmed() -> Order {
        let order = placed();
        let events = order
            .confirm_payment(ConfirmPayment {
                payment_ref: "pay_1".to_string(),
                payment_method: "card".to_string(),
                transaction_id: AggregateId::new(),
                fee_rate: FeeRate::from_bps(500).unwrap(),
                confirmed_at: now(),
            })
            .unwrap();
        with(order, events)
    }

    fn shipment() -> ShipmentDetails {
        ShipmentDetails {
            shipment_id: "SHP-1".to_string(),
            awb_code: "AWB123".to_string(),
            courier_name: "Bluedart".to_string(),
            tracking_url: None,
            estimated_delivery: None,
        }
    }

    fn delivered() -> Order {
        let order = confirmed();
        let events = order.ship(shipment(), Actor::System, now()).unwrap();
        let order = with(order, events);
        let events = order.deliver(Actor::Carrier, now(), Duration::days(7)).unwrap();
        with(order, events)
    }

    #[test]
    fn placing_computes_totals() {
        let order = placed();
        assert_eq!(order.subtotal(), Money::from_cents(1000));
        assert_eq!(order.grand_total(), Money::from_cents(1050));
        assert_eq!(order.status(), OrderStatus::PaymentPending);
        assert_eq!(order.history().len(), 1);
        assert!(order.can_cancel());
    }

    #[test]
    fn placing_rejects_empty_and_zero_lots() {
        let base = PlaceOrder {
            order_id: AggregateId::new(),
            buyer_id: BuyerId::new(),
            seller_id: SellerId::new(),
            cart_id: None,
            payment_intent_id: "pi".to_string(),
            line_items: vec![],
            shipping_fee: Money::zero(),
            placed_at: now(),
        };
        assert!(matches!(
            Order::default().place(base.clone()),
            Err(OrderError::NoLineItems)
        ));

        let zero_lots = PlaceOrder {
            line_items: vec![LineItem::new(ProductId::new(), 0, 5, Money::from_cents(1))],
            ..base
        };
        assert!(matches!(
            Order::default().place(zero_lots),
            Err(OrderError::InvalidLineItem(_))
        ));
        assert!(matches!(placed().place(placed_cmd()), Err(OrderError::AlreadyPlaced)));
    }

    fn placed_cmd() -> PlaceOrder {
        PlaceOrder {
            order_id: AggregateId::new(),
            buyer_id: BuyerId::new(),
            seller_id: SellerId::new(),
            cart_id: None,
            payment_intent_id: "pi".to_string(),
            line_items: vec![LineItem::new(ProductId::new(), 1, 1, Money::from_cents(1))],
            shipping_fee: Money::zero(),
            placed_at: now(),
        }
    }

    #[test]
    fn confirmation_stamps_fee_and_deducts_once() {
        let order = confirmed();
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert_eq!(order.payment_status(), PaymentStatus::Paid);
        assert!(order.stock_deducted());
        // 5% of 10.50
        assert_eq!(order.platform_fee(), Some(Money::from_cents(53)));
        assert_eq!(
            order.seller_net().unwrap() + order.platform_fee().unwrap(),
            order.grand_total()
        );

        let again = order.confirm_payment(ConfirmPayment {
            payment_ref: "pay_1".to_string(),
            payment_method: "card".to_string(),
            transaction_id: AggregateId::new(),
            fee_rate: FeeRate::default(),
            confirmed_at: now(),
        });
        assert!(matches!(again, Err(OrderError::InvalidTransition { .. })));
    }

    #[test]
    fn verification_lease_blocks_second_verifier_until_expiry() {
        let order = placed();
        let events = order
            .begin_verification("pay_1", now(), Duration::seconds(60))
            .unwrap();
        let order = with(order, events);
        let history_len = order.history().len();

        assert!(order.is_verification_in_progress(now()));
        assert!(matches!(
            order.begin_verification("pay_1", now() + Duration::seconds(30), Duration::seconds(60)),
            Err(OrderError::VerificationInProgress { .. })
        ));
        assert!(
            order
                .begin_verification("pay_1", now() + Duration::seconds(61), Duration::seconds(60))
                .is_ok()
        );
        assert_eq!(order.history().len(), history_len);
    }

    #[test]
    fn verification_of_paid_order_reports_resolution() {
        assert!(matches!(
            confirmed().begin_verification("pay_1", now(), Duration::seconds(60)),
            Err(OrderError::PaymentAlreadyResolved {
                payment_status: PaymentStatus::Paid,
                ..
            })
        ));
    }

    #[test]
    fn unpaid_cancellation_fails_payment_without_refund() {
        let order = placed();
        let events = order.cancel("changed my mind", Actor::System, now()).unwrap();
        let order = with(order, events);

        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.payment_status(), PaymentStatus::Failed);
        assert!(order.refund().is_none());
        assert!(!order.stock_deducted());
    }

    #[test]
    fn paid_cancellation_releases_stock_and_owes_refund() {
        let order = confirmed();
        let events = order.cancel("out of stock", Actor::System, now()).unwrap();
        match &events[0] {
            OrderEvent::OrderCancelled(data) => {
                assert!(data.stock_released);
                assert_eq!(data.refund.as_ref().unwrap().amount, Money::from_cents(1050));
            }
            other => panic!("unexpected event {other:?}"),
        }
        let order = with(order, events);

        assert_eq!(order.payment_status(), PaymentStatus::RefundProcessing);
        assert!(!order.stock_deducted());
        assert!(order.refund_pending());

        let again = order.cancel("again", Actor::System, now());
        assert!(matches!(
            again,
            Err(OrderError::CancellationNotAllowed {
                status: OrderStatus::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn packed_buyer_cancel_needs_approval() {
        let order = confirmed();
        let events = order.pack(Actor::System, now()).unwrap();
        let order = with(order, events);

        let buyer = Actor::Buyer(order.buyer_id().unwrap());
        let events = order.request_cancellation("late", buyer, now()).unwrap();
        let order = with(order, events);
        assert_eq!(order.status(), OrderStatus::CancellationRequested);
        assert!(!order.can_cancel());

        let events = order.reject_cancellation("already packed", Actor::System, now()).unwrap();
        let rejected = with(order.clone(), events);
        assert_eq!(rejected.status(), OrderStatus::Packed);

        let events = order.approve_cancellation(Actor::System, now()).unwrap();
        let approved = with(order, events);
        assert_eq!(approved.status(), OrderStatus::Cancelled);
        assert_eq!(approved.payment_status(), PaymentStatus::RefundProcessing);
    }

    #[test]
    fn confirmed_buyer_cancel_is_immediate() {
        let order = confirmed();
        let buyer = Actor::Buyer(order.buyer_id().unwrap());
        let events = order.request_cancellation("oops", buyer, now()).unwrap();
        assert!(matches!(events[0], OrderEvent::OrderCancelled(_)));
    }

    #[test]
    fn shipping_requires_carrier_code() {
        let order = confirmed();
        let mut details = shipment();
        details.awb_code = " ".to_string();
        assert!(matches!(
            order.ship(details, Actor::System, now()),
            Err(OrderError::MissingCarrierCode)
        ));
    }

    #[test]
    fn shipped_order_cannot_be_cancelled() {
        let order = confirmed();
        let events = order.ship(shipment(), Actor::System, now()).unwrap();
        let order = with(order, events);
        assert!(!order.can_cancel());
        assert!(matches!(
            order.cancel("no", Actor::System, now()),
            Err(OrderError::CancellationNotAllowed {
                status: OrderStatus::Shipped,
                ..
            })
        ));
    }

    #[test]
    fn carrier_updates_ignore_repeats() {
        let order = confirmed();
        let events = order.ship(shipment(), Actor::System, now()).unwrap();
        let order = with(order, events);
        let events = order
            .update_shipment_status(OrderStatus::InTransit, "IN TRANSIT", now())
            .unwrap();
        let order = with(order, events);

        assert!(
            order
                .update_shipment_status(OrderStatus::InTransit, "IN TRANSIT", now())
                .unwrap()
                .is_empty()
        );
        assert!(matches!(
            order.update_shipment_status(OrderStatus::Cancelled, "CANCELLED", now()),
            Err(OrderError::NotAShipmentUpdate(_))
        ));
    }

    #[test]
    fn delivery_opens_return_window() {
        let order = delivered();
        assert_eq!(order.status(), OrderStatus::Delivered);
        assert!(order.can_return());
        assert_eq!(
            order.return_window_expires_at(),
            Some(now() + Duration::days(7))
        );
    }

    #[test]
    fn return_after_window_is_refused_and_window_closes() {
        let order = delivered();
        let late = now() + Duration::days(8);

        assert!(matches!(
            order.request_return("broken", vec![], Actor::System, late),
            Err(OrderError::ReturnWindowExpired { .. })
        ));

        let events = order.close_return_window(late).unwrap();
        let order = with(order, events);
        assert_eq!(order.status(), OrderStatus::Completed);
        assert!(!order.can_return());
    }

    #[test]
    fn window_stays_open_until_expiry() {
        let order = delivered();
        assert!(
            order
                .close_return_window(now() + Duration::days(6))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn full_return_flow_refunds() {
        let order = delivered();
        let events = order
            .request_return("damaged", vec!["img-1".into()], Actor::System, now())
            .unwrap();
        let order = with(order, events);
        let events = order.approve_return(Some(now()), Actor::System, now()).unwrap();
        let order = with(order, events);
        let events = order.mark_returned(Actor::System, now()).unwrap();
        let order = with(order, events);

        assert_eq!(order.status(), OrderStatus::Returned);
        assert_eq!(order.payment_status(), PaymentStatus::RefundProcessing);
        assert!(!order.stock_deducted());

        let events = order.record_refund_initiated("rf_1", now()).unwrap();
        let order = with(order, events);
        assert!(!order.refund_pending());
        assert!(order.record_refund_initiated("rf_1", now()).unwrap().is_empty());

        let events = order
            .complete_refund("rf_1", Money::from_cents(1050), now())
            .unwrap();
        let order = with(order, events);
        assert_eq!(order.status(), OrderStatus::Refunded);
        assert_eq!(order.payment_status(), PaymentStatus::Refunded);
        assert!(order.complete_refund("rf_1", Money::zero(), now()).unwrap().is_empty());
    }

    #[test]
    fn capture_refund_on_failed_order_keeps_payment_status() {
        let order = placed();
        let events = order.fail_payment("abandoned", Actor::System, now()).unwrap();
        let order = with(order, events);
        let events = order
            .request_capture_refund(
                RefundDue {
                    amount: Money::from_cents(1050),
                    payment_ref: "pay_late".to_string(),
                },
                "late capture",
                now(),
            )
            .unwrap();
        let order = with(order, events);

        assert_eq!(order.payment_status(), PaymentStatus::Failed);
        assert!(order.refund_pending());
        assert!(
            order
                .request_capture_refund(
                    RefundDue {
                        amount: Money::from_cents(1050),
                        payment_ref: "pay_late".to_string(),
                    },
                    "late capture",
                    now(),
                )
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn every_status_change_appends_one_history_entry() {
        let order = delivered();
        let statuses: Vec<_> = order.history().iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                OrderStatus::PaymentPending,
                OrderStatus::Confirmed,
                OrderStatus::Shipped,
                OrderStatus::Delivered
            ]
        );
    }

    #[test]
    fn refused_transitions_leave_status_unchanged() {
        use OrderStatus::*;

        let order = placed();
        for cmd in [
            order.start_processing(now()),
            order.pack(Actor::System, now()),
            order.ship(shipment(), Actor::System, now()),
            order.deliver(Actor::System, now(), Duration::days(7)),
            order.approve_return(None, Actor::System, now()),
            order.mark_returned(Actor::System, now()),
        ] {
            assert!(matches!(
                cmd,
                Err(OrderError::InvalidTransition {
                    from: PaymentPending,
                    ..
                })
            ));
        }
        assert_eq!(order.status(), PaymentPending);
    }

    #[test]
    fn commands_on_unplaced_order_fail() {
        assert!(matches!(
            Order::default().start_processing(now()),
            Err(OrderError::NotPlaced)
        ));
    }
}
