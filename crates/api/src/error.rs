//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use saga::{InventoryError, PaymentError, SagaError};
use serde_json::json;

/// What buyers see when a payment cannot be verified. Gateway detail stays in the logs.
const PAYMENT_FAILED: &str = "payment could not be verified";

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Domain(DomainError),
    Saga(SagaError),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Internal(msg) => internal(msg),
        };
        (status, Json(body)).into_response()
    }
}

fn internal(msg: String) -> (StatusCode, serde_json::Value) {
    tracing::error!(error = %msg, "internal server error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": "internal server error" }),
    )
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, serde_json::Value) {
    match &err {
        DomainError::AggregateNotFound { .. } => {
            (StatusCode::NOT_FOUND, json!({ "error": err.to_string() }))
        }
        DomainError::Settings(_) => (StatusCode::BAD_REQUEST, json!({ "error": err.to_string() })),
        _ if err.is_conflict() => (StatusCode::CONFLICT, json!({ "error": err.to_string() })),
        // order and settlement rule violations carry their own mapping through SagaError
        DomainError::Order(_) | DomainError::Settlement(_) => {
            saga_error_to_response(SagaError::from(err))
        }
        _ => internal(err.to_string()),
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, serde_json::Value) {
    match err {
        SagaError::Validation(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
        SagaError::InsufficientStock {
            product_id,
            available_lots,
        } => (
            StatusCode::CONFLICT,
            json!({
                "error": "insufficient stock",
                "product_id": product_id,
                "available_lots": available_lots,
            }),
        ),
        SagaError::Payment(PaymentError::InvalidSignature) => (
            StatusCode::UNAUTHORIZED,
            json!({ "error": "invalid signature" }),
        ),
        SagaError::Payment(PaymentError::OrderNotFound(intent)) => (
            StatusCode::NOT_FOUND,
            json!({ "error": format!("no orders for payment intent {intent}") }),
        ),
        SagaError::Payment(e) => {
            tracing::warn!(error = %e, "payment verification failed");
            (StatusCode::PAYMENT_REQUIRED, json!({ "error": PAYMENT_FAILED }))
        }
        SagaError::OrderState {
            current_status,
            reason,
        } => (
            StatusCode::CONFLICT,
            json!({
                "error": "order state does not allow this action",
                "current_status": current_status,
                "reason": reason,
            }),
        ),
        SagaError::OrderNotFound(id) => (
            StatusCode::NOT_FOUND,
            json!({ "error": format!("order {id} not found") }),
        ),
        SagaError::ExternalService { service, message } => {
            tracing::warn!(service, error = %message, "external service failed");
            (
                StatusCode::BAD_GATEWAY,
                json!({ "error": format!("{service} is unavailable") }),
            )
        }
        SagaError::Inventory(InventoryError::UnknownProduct(product_id)) => (
            StatusCode::BAD_REQUEST,
            json!({ "error": format!("unknown product {product_id}") }),
        ),
        SagaError::Domain(e) if e.is_conflict() => {
            (StatusCode::CONFLICT, json!({ "error": e.to_string() }))
        }
        other => internal(other.to_string()),
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{OrderStatus, ProductId};

    fn status_of(err: SagaError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_saga_errors_map_to_status_codes() {
        assert_eq!(
            status_of(SagaError::Validation("no items".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SagaError::InsufficientStock {
                product_id: ProductId::new(),
                available_lots: 1,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(PaymentError::InvalidSignature.into()),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(PaymentError::NotCaptured {
                status: "failed".into()
            }
            .into()),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(PaymentError::OrderNotFound("pi_1".into()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(SagaError::OrderState {
                current_status: OrderStatus::Shipped,
                reason: "handed to the carrier".into(),
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SagaError::external("carrier", "timeout")),
            StatusCode::BAD_GATEWAY
        );
    }
}
