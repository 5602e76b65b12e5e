//! Saga error types.
//!
//! [`SagaError`] is the taxonomy callers see: validation, stock shortfall,
//! payment, order state and external service failures, plus wrappers for
//! the infrastructure underneath.

use common::AggregateId;
use domain::{DomainError, OrderError, OrderStatus, ProductId};
use projections::ProjectionError;
use thiserror::Error;

/// Failures of the stock counter itself.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Insufficient stock for {product_id}: requested {requested} units, {available} available")]
    InsufficientStock {
        product_id: ProductId,
        requested: u64,
        available: u64,
    },

    #[error("Unknown product {0}")]
    UnknownProduct(ProductId),

    #[error("Inventory database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment signature is invalid")]
    InvalidSignature,

    #[error("No orders found for payment intent {0}")]
    OrderNotFound(String),

    #[error("Payment not captured (gateway status {status})")]
    NotCaptured { status: String },

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),
}

#[derive(Debug, Error)]
pub enum SagaError {
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Shortfall reported in lots, the unit buyers order in.
    #[error("Insufficient stock for {product_id}: {available_lots} lots available")]
    InsufficientStock {
        product_id: ProductId,
        available_lots: u64,
    },

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("Order is {current_status}: {reason}")]
    OrderState {
        current_status: OrderStatus,
        reason: String,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    #[error("{service} error: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("Domain error: {0}")]
    Domain(DomainError),

    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),
}

impl SagaError {
    pub fn external(service: &'static str, message: impl Into<String>) -> Self {
        SagaError::ExternalService {
            service,
            message: message.into(),
        }
    }

    /// Worth retrying on the next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            SagaError::ExternalService { .. } => true,
            SagaError::Payment(PaymentError::GatewayUnavailable(_)) => true,
            SagaError::Domain(e) => e.is_conflict(),
            _ => false,
        }
    }
}

impl From<DomainError> for SagaError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Order(order) => order.into(),
            DomainError::AggregateNotFound {
                aggregate_type: "Order",
                aggregate_id,
            } => match aggregate_id.parse() {
                Ok(id) => SagaError::OrderNotFound(id),
                Err(_) => SagaError::Domain(DomainError::AggregateNotFound {
                    aggregate_type: "Order",
                    aggregate_id,
                }),
            },
            other => SagaError::Domain(other),
        }
    }
}

impl From<OrderError> for SagaError {
    fn from(e: OrderError) -> Self {
        match e.current_status() {
            Some(current_status) => SagaError::OrderState {
                current_status,
                reason: refusal_reason(&e),
            },
            None => match e {
                OrderError::ReturnWindowExpired { .. } => SagaError::OrderState {
                    current_status: OrderStatus::Delivered,
                    reason: e.to_string(),
                },
                OrderError::NoLineItems
                | OrderError::InvalidLineItem(_)
                | OrderError::MissingCarrierCode => SagaError::Validation(e.to_string()),
                other => SagaError::Domain(DomainError::Order(other)),
            },
        }
    }
}

fn refusal_reason(e: &OrderError) -> String {
    match e {
        OrderError::CancellationNotAllowed { reason, .. }
        | OrderError::ReturnNotAllowed { reason, .. } => (*reason).to_string(),
        other => other.to_string(),
    }
}

pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_cancellation_carries_status_and_reason() {
        let err: SagaError = DomainError::Order(OrderError::CancellationNotAllowed {
            status: OrderStatus::Shipped,
            reason: "order has already shipped",
        })
        .into();

        match err {
            SagaError::OrderState {
                current_status,
                reason,
            } => {
                assert_eq!(current_status, OrderStatus::Shipped);
                assert_eq!(reason, "order has already shipped");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_order_maps_to_not_found() {
        let id = AggregateId::new();
        let err: SagaError = DomainError::AggregateNotFound {
            aggregate_type: "Order",
            aggregate_id: id.to_string(),
        }
        .into();
        assert!(matches!(err, SagaError::OrderNotFound(found) if found == id));
    }

    #[test]
    fn malformed_lines_are_validation_errors() {
        let err: SagaError = OrderError::NoLineItems.into();
        assert!(matches!(err, SagaError::Validation(_)));
    }
}
