//! Order aggregate: one seller's share of a checkout, from payment to payout.

mod aggregate;
mod commands;
mod events;
mod service;
mod status;
mod value_objects;

pub use aggregate::{Order, RefundObligation, RequestInfo, StatusEntry};
pub use commands::{ConfirmPayment, PlaceOrder};
pub use events::{
    ActionData, CaptureRefundData, OrderCancelledData, OrderDeliveredData, OrderEvent,
    OrderPlacedData, OrderReturnedData, OrderShippedData, PaymentConfirmedData, PaymentFailedData,
    ProcessingStartedData, ReasonData, RefundCompletedData, RefundInitiatedData,
    ReturnApprovedData, ReturnRequestedData, ShipmentStatusUpdatedData, VerificationStartedData,
};
pub use service::OrderService;
pub use status::{OrderStatus, PaymentStatus};
pub use value_objects::{
    Actor, BuyerId, CartId, FeeRate, LineItem, Money, ProductId, RefundDue, SellerId,
    ShipmentDetails,
};

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order already placed")]
    AlreadyPlaced,

    #[error("Order has not been placed")]
    NotPlaced,

    #[error("Order has no line items")]
    NoLineItems,

    #[error("Invalid line item: {0}")]
    InvalidLineItem(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Cannot cancel order in {status} status: {reason}")]
    CancellationNotAllowed {
        status: OrderStatus,
        reason: &'static str,
    },

    #[error("Cannot return order in {status} status: {reason}")]
    ReturnNotAllowed {
        status: OrderStatus,
        reason: &'static str,
    },

    #[error("Return window expired at {expired_at}")]
    ReturnWindowExpired { expired_at: DateTime<Utc> },

    #[error("Payment already resolved: order is {status}, payment is {payment_status}")]
    PaymentAlreadyResolved {
        status: OrderStatus,
        payment_status: PaymentStatus,
    },

    #[error("Payment verification already in progress until {until}")]
    VerificationInProgress { until: DateTime<Utc> },

    #[error("Stock has already been deducted for this order")]
    StockAlreadyDeducted,

    #[error("Shipment requires a carrier tracking code")]
    MissingCarrierCode,

    #[error("Carrier status {0} does not map to a shipment update")]
    NotAShipmentUpdate(OrderStatus),

    #[error("No refund is owed on this order")]
    NoRefundOwed,

    #[error("Refund already initiated with reference {0}")]
    RefundAlreadyInitiated(String),
}

impl OrderError {
    /// The order's status when the error describes a refused transition.
    pub fn current_status(&self) -> Option<OrderStatus> {
        match self {
            OrderError::InvalidTransition { from, .. } => Some(*from),
            OrderError::CancellationNotAllowed { status, .. }
            | OrderError::ReturnNotAllowed { status, .. }
            | OrderError::PaymentAlreadyResolved { status, .. } => Some(*status),
            _ => None,
        }
    }
}
