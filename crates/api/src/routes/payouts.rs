//! Seller payouts.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use domain::SellerId;
use event_store::EventStore;
use projections::SellerPayout;
use saga::PayoutBatch;
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CompletePayoutRequest {
    pub seller_id: SellerId,
    /// Bank transfer reference for the batch.
    pub reference: String,
}

/// GET /payouts/pending: eligible payouts grouped per seller.
#[tracing::instrument(skip(state))]
pub async fn pending<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<SellerPayout>>, ApiError> {
    Ok(Json(state.saga.pending_payouts().await?))
}

/// POST /payouts/complete
#[tracing::instrument(skip(state, req), fields(seller_id = %req.seller_id))]
pub async fn complete<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CompletePayoutRequest>,
) -> Result<Json<PayoutBatch>, ApiError> {
    let batch = state
        .saga
        .complete_payouts(req.seller_id, &req.reference)
        .await?;
    Ok(Json(batch))
}
