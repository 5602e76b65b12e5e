//! Order domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{
    Actor, BuyerId, CartId, FeeRate, LineItem, Money, OrderStatus, RefundDue, SellerId,
    ShipmentDetails,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    OrderPlaced(OrderPlacedData),

    /// A verifier claimed the order. Not a status change.
    PaymentVerificationStarted(VerificationStartedData),

    PaymentConfirmed(PaymentConfirmedData),
    PaymentFailed(PaymentFailedData),
    ProcessingStarted(ProcessingStartedData),
    OrderPacked(ActionData),
    CancellationRequested(ReasonData),
    CancellationRejected(ReasonData),
    OrderCancelled(OrderCancelledData),
    OrderShipped(OrderShippedData),
    ShipmentStatusUpdated(ShipmentStatusUpdatedData),
    OrderDelivered(OrderDeliveredData),
    ReturnRequested(ReturnRequestedData),
    ReturnApproved(ReturnApprovedData),
    ReturnRejected(ReasonData),
    OrderReturned(OrderReturnedData),

    /// Money was captured for an order that had already failed; it must go back.
    CaptureRefundRequested(CaptureRefundData),

    RefundInitiated(RefundInitiatedData),
    RefundCompleted(RefundCompletedData),
    OrderCompleted(ActionData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::PaymentVerificationStarted(_) => "PaymentVerificationStarted",
            OrderEvent::PaymentConfirmed(_) => "PaymentConfirmed",
            OrderEvent::PaymentFailed(_) => "PaymentFailed",
            OrderEvent::ProcessingStarted(_) => "ProcessingStarted",
            OrderEvent::OrderPacked(_) => "OrderPacked",
            OrderEvent::CancellationRequested(_) => "CancellationRequested",
            OrderEvent::CancellationRejected(_) => "CancellationRejected",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
            OrderEvent::OrderShipped(_) => "OrderShipped",
            OrderEvent::ShipmentStatusUpdated(_) => "ShipmentStatusUpdated",
            OrderEvent::OrderDelivered(_) => "OrderDelivered",
            OrderEvent::ReturnRequested(_) => "ReturnRequested",
            OrderEvent::ReturnApproved(_) => "ReturnApproved",
            OrderEvent::ReturnRejected(_) => "ReturnRejected",
            OrderEvent::OrderReturned(_) => "OrderReturned",
            OrderEvent::CaptureRefundRequested(_) => "CaptureRefundRequested",
            OrderEvent::RefundInitiated(_) => "RefundInitiated",
            OrderEvent::RefundCompleted(_) => "RefundCompleted",
            OrderEvent::OrderCompleted(_) => "OrderCompleted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    pub order_id: AggregateId,
    pub buyer_id: BuyerId,
    pub seller_id: SellerId,
    pub cart_id: Option<CartId>,
    /// Shared by every sibling order of one checkout.
    pub payment_intent_id: String,
    pub line_items: Vec<LineItem>,
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub grand_total: Money,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationStartedData {
    pub payment_ref: String,
    pub started_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmedData {
    pub payment_ref: String,
    pub payment_method: String,
    pub transaction_id: AggregateId,
    pub platform_fee_rate: FeeRate,
    pub platform_fee: Money,
    pub seller_net: Money,
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedData {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
    pub actor: Actor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStartedData {
    pub started_at: DateTime<Utc>,
}

/// A status change with nothing more to say than who and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionData {
    pub actor: Actor,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonData {
    pub reason: String,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub reason: String,
    pub actor: Actor,
    pub cancelled_at: DateTime<Utc>,
    /// Stock was deducted and is being put back by this cancellation.
    pub stock_released: bool,
    /// Set when the order had been paid.
    pub refund: Option<RefundDue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderShippedData {
    pub shipment: ShipmentDetails,
    pub actor: Actor,
    pub shipped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentStatusUpdatedData {
    pub status: OrderStatus,
    /// Status text as the carrier reported it.
    pub carrier_status: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDeliveredData {
    pub delivered_at: DateTime<Utc>,
    pub return_window_expires_at: DateTime<Utc>,
    pub actor: Actor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnRequestedData {
    pub reason: String,
    /// References to uploaded photos.
    pub images: Vec<String>,
    pub actor: Actor,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnApprovedData {
    pub pickup_scheduled_at: Option<DateTime<Utc>>,
    pub actor: Actor,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReturnedData {
    pub returned_at: DateTime<Utc>,
    pub stock_released: bool,
    pub refund: Option<RefundDue>,
    pub actor: Actor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRefundData {
    pub refund: RefundDue,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundInitiatedData {
    pub refund_ref: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundCompletedData {
    pub refund_ref: String,
    pub amount: Money,
    pub at: DateTime<Utc>,
}
