//! Order reads and the post-payment lifecycle actions.
//!
//! Callers identify themselves in the request body; authentication sits in
//! front of this service.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use domain::{
    Actor, Aggregate, BuyerId, LineItem, Money, Order, OrderStatus, PaymentStatus,
    RefundObligation, RequestInfo, SellerId, ShipmentDetails, StatusEntry,
};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use super::parse_aggregate_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub buyer_id: Option<BuyerId>,
    pub seller_id: Option<SellerId>,
    pub payment_intent_id: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub line_items: Vec<LineItem>,
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub grand_total: Money,
    pub platform_fee: Option<Money>,
    pub seller_net: Option<Money>,
    pub payment_ref: Option<String>,
    pub shipment: Option<ShipmentDetails>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub return_window_expires_at: Option<DateTime<Utc>>,
    pub cancellation: Option<RequestInfo>,
    pub return_request: Option<RequestInfo>,
    pub refund: Option<RefundObligation>,
    pub can_cancel: bool,
    pub can_return: bool,
    pub history: Vec<StatusEntry>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().map(|id| id.to_string()).unwrap_or_default(),
            buyer_id: order.buyer_id(),
            seller_id: order.seller_id(),
            payment_intent_id: order.payment_intent_id().to_string(),
            status: order.status(),
            payment_status: order.payment_status(),
            line_items: order.line_items().to_vec(),
            subtotal: order.subtotal(),
            shipping_fee: order.shipping_fee(),
            grand_total: order.grand_total(),
            platform_fee: order.platform_fee(),
            seller_net: order.seller_net(),
            payment_ref: order.payment_ref().map(String::from),
            shipment: order.shipment().cloned(),
            delivered_at: order.delivered_at(),
            return_window_expires_at: order.return_window_expires_at(),
            cancellation: order.cancellation().cloned(),
            return_request: order.return_request().cloned(),
            refund: order.refund().cloned(),
            can_cancel: order.can_cancel(),
            can_return: order.can_return(),
            history: order.history().to_vec(),
        }
    }
}

fn respond(order: Order) -> Json<OrderResponse> {
    Json(OrderResponse::from(&order))
}

#[derive(Deserialize)]
pub struct SellerRequest {
    pub seller_id: SellerId,
}

#[derive(Deserialize)]
pub struct SellerDecisionRequest {
    pub seller_id: SellerId,
    pub reason: String,
}

#[derive(Deserialize)]
pub struct ActorRequest {
    pub actor: Actor,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub actor: Actor,
    pub reason: String,
}

#[derive(Deserialize)]
pub struct ReturnRequest {
    pub buyer_id: BuyerId,
    pub reason: String,
    #[serde(default)]
    pub images: Vec<String>,
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state.saga.order(order_id).await?;
    Ok(respond(order))
}

#[derive(Serialize)]
pub struct EventEnvelopeResponse {
    pub event_id: String,
    pub event_type: String,
    pub version: i64,
    pub timestamp: String,
    pub payload: serde_json::Value,
}

/// GET /orders/{id}/events: the raw audit log of one order.
#[tracing::instrument(skip(state))]
pub async fn events<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventEnvelopeResponse>>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let envelopes = state
        .event_store
        .get_events_for_aggregate(order_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if envelopes.is_empty() {
        return Err(ApiError::NotFound(format!("order {id} not found")));
    }

    Ok(Json(
        envelopes
            .into_iter()
            .map(|e| EventEnvelopeResponse {
                event_id: e.event_id.to_string(),
                event_type: e.event_type,
                version: e.version.as_i64(),
                timestamp: e.timestamp.to_rfc3339(),
                payload: e.payload,
            })
            .collect(),
    ))
}

/// POST /orders/{id}/pack
#[tracing::instrument(skip(state, req))]
pub async fn pack<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<SellerRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    Ok(respond(state.saga.pack(order_id, req.seller_id).await?))
}

/// POST /orders/{id}/ship: books the carrier and records the shipment.
#[tracing::instrument(skip(state, req))]
pub async fn ship<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<SellerRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    Ok(respond(state.saga.ship(order_id, req.seller_id).await?))
}

/// POST /orders/{id}/cancel
///
/// Buyers cancel directly before packing and file a request afterwards;
/// sellers and admins cancel directly.
#[tracing::instrument(skip(state, req))]
pub async fn cancel<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = match req.actor {
        Actor::Buyer(buyer_id) => {
            state
                .saga
                .buyer_cancel(order_id, buyer_id, &req.reason)
                .await?
        }
        actor @ (Actor::Seller(_) | Actor::Admin(_)) => {
            state.saga.cancel(order_id, actor, &req.reason).await?
        }
        _ => {
            return Err(ApiError::BadRequest(
                "only buyers, sellers and admins can cancel".to_string(),
            ));
        }
    };
    Ok(respond(order))
}

/// POST /orders/{id}/cancellation/approve
#[tracing::instrument(skip(state, req))]
pub async fn approve_cancellation<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    Ok(respond(
        state.saga.approve_cancellation(order_id, req.actor).await?,
    ))
}

/// POST /orders/{id}/cancellation/reject
#[tracing::instrument(skip(state, req))]
pub async fn reject_cancellation<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    Ok(respond(
        state
            .saga
            .reject_cancellation(order_id, req.actor, &req.reason)
            .await?,
    ))
}

/// POST /orders/{id}/return
#[tracing::instrument(skip(state, req))]
pub async fn request_return<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<ReturnRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    Ok(respond(
        state
            .saga
            .request_return(order_id, req.buyer_id, &req.reason, req.images)
            .await?,
    ))
}

/// POST /orders/{id}/return/approve
#[tracing::instrument(skip(state, req))]
pub async fn approve_return<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<SellerRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    Ok(respond(
        state.saga.approve_return(order_id, req.seller_id).await?,
    ))
}

/// POST /orders/{id}/return/reject
#[tracing::instrument(skip(state, req))]
pub async fn reject_return<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<SellerDecisionRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    Ok(respond(
        state
            .saga
            .reject_return(order_id, req.seller_id, &req.reason)
            .await?,
    ))
}

/// POST /orders/{id}/returned: the parcel is back with the seller.
#[tracing::instrument(skip(state, req))]
pub async fn mark_returned<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    Ok(respond(state.saga.mark_returned(order_id, req.actor).await?))
}
