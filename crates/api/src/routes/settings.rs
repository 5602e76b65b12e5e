//! Platform administration.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct UpdateFeeRequest {
    pub bps: u32,
    pub updated_by: String,
}

#[derive(Serialize)]
pub struct FeeResponse {
    pub bps: u32,
    pub display: String,
}

/// PUT /settings/platform-fee
///
/// Applies to payments verified from now on; recorded Transactions keep their rate.
#[tracing::instrument(skip(state, req), fields(bps = req.bps))]
pub async fn update_platform_fee<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<UpdateFeeRequest>,
) -> Result<Json<FeeResponse>, ApiError> {
    if req.updated_by.trim().is_empty() {
        return Err(ApiError::BadRequest("updated_by is required".to_string()));
    }
    state
        .saga
        .settings()
        .update_fee(req.bps, &req.updated_by)
        .await?;
    let rate = state.saga.settings().current_fee_rate().await?;
    Ok(Json(FeeResponse {
        bps: rate.bps(),
        display: rate.to_string(),
    }))
}
