//! Payment confirmation from the buyer's client and from the gateway.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use event_store::EventStore;
use saga::{PaymentError, VerificationOutcome, WebhookOutcome};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

pub const SIGNATURE_HEADER: &str = "x-payment-signature";

#[derive(Deserialize)]
pub struct VerifyPaymentRequest {
    pub payment_intent_id: String,
    pub payment_ref: String,
    pub signature: String,
}

/// POST /payments/verify
#[tracing::instrument(skip(state, req), fields(payment_intent_id = %req.payment_intent_id))]
pub async fn verify<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<Json<VerificationOutcome>, ApiError> {
    let outcome = state
        .saga
        .verify_payment(&req.payment_intent_id, &req.payment_ref, &req.signature)
        .await?;
    Ok(Json(outcome))
}

/// POST /payments/webhook
///
/// Takes the raw body: the signature is computed over the exact bytes sent.
#[tracing::instrument(skip(state, headers, body))]
pub async fn webhook<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(saga::SagaError::Payment(PaymentError::InvalidSignature))?;
    let outcome = state.saga.handle_payment_webhook(&body, signature).await?;
    Ok(Json(outcome))
}
