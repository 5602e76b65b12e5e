//! Carrier tracking updates.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use event_store::EventStore;
use saga::{CarrierWebhook, ShipmentUpdate};

use crate::AppState;
use crate::error::ApiError;

/// POST /shipments/webhook
#[tracing::instrument(skip(state, update), fields(order_id = %update.order_id))]
pub async fn webhook<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(update): Json<CarrierWebhook>,
) -> Result<Json<ShipmentUpdate>, ApiError> {
    Ok(Json(state.saga.handle_carrier_webhook(update).await?))
}
