//! Carts, checkout and product listings.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use domain::{BuyerId, CartId, Money, ProductId};
use event_store::EventStore;
use saga::services::{Cart, CartLine, ProductListing};
use saga::{CheckoutLine, CheckoutReceipt, CheckoutRequest};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CreateCartRequest {
    pub buyer_id: BuyerId,
    pub lines: Vec<CheckoutLine>,
}

#[derive(Serialize)]
pub struct CartCreatedResponse {
    pub cart_id: CartId,
}

#[derive(Deserialize)]
pub struct CheckoutCartRequest {
    pub cart_id: CartId,
    #[serde(default)]
    pub shipping_fee: Money,
}

#[derive(Deserialize)]
pub struct BuyNowRequest {
    pub buyer_id: BuyerId,
    pub product_id: ProductId,
    pub lot_quantity: u32,
    #[serde(default)]
    pub shipping_fee: Money,
}

/// POST /products: create or replace a listing and its stock counter.
#[tracing::instrument(skip(state, listing), fields(product_id = %listing.product_id))]
pub async fn upsert_product<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(listing): Json<ProductListing>,
) -> Result<(StatusCode, Json<ProductListing>), ApiError> {
    if listing.lot_size == 0 {
        return Err(ApiError::BadRequest("lot_size must be at least 1".to_string()));
    }
    state
        .saga
        .inventory()
        .upsert_product(listing.clone())
        .await
        .map_err(saga::SagaError::from)?;
    Ok((StatusCode::CREATED, Json(listing)))
}

/// POST /carts: store a cart until it is checked out.
#[tracing::instrument(skip(state, req), fields(buyer_id = %req.buyer_id))]
pub async fn create_cart<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateCartRequest>,
) -> Result<(StatusCode, Json<CartCreatedResponse>), ApiError> {
    if req.lines.is_empty() {
        return Err(ApiError::BadRequest("cart has no items".to_string()));
    }
    let cart = Cart {
        cart_id: CartId::new(),
        buyer_id: req.buyer_id,
        lines: req
            .lines
            .into_iter()
            .map(|l| CartLine {
                product_id: l.product_id,
                lot_quantity: l.lot_quantity,
            })
            .collect(),
        created_at: state.saga.now(),
    };
    let cart_id = cart.cart_id;
    state.saga.carts().save(cart).await?;
    Ok((StatusCode::CREATED, Json(CartCreatedResponse { cart_id })))
}

/// POST /checkout/cart
#[tracing::instrument(skip(state, req), fields(cart_id = %req.cart_id))]
pub async fn checkout_cart<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CheckoutCartRequest>,
) -> Result<(StatusCode, Json<CheckoutReceipt>), ApiError> {
    let receipt = state
        .saga
        .checkout_cart(req.cart_id, req.shipping_fee)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /checkout/buy-now
#[tracing::instrument(skip(state, req), fields(buyer_id = %req.buyer_id))]
pub async fn buy_now<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<BuyNowRequest>,
) -> Result<(StatusCode, Json<CheckoutReceipt>), ApiError> {
    let receipt = state
        .saga
        .checkout(CheckoutRequest {
            buyer_id: req.buyer_id,
            cart_id: None,
            lines: vec![CheckoutLine {
                product_id: req.product_id,
                lot_quantity: req.lot_quantity,
            }],
            shipping_fee: req.shipping_fee,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}
