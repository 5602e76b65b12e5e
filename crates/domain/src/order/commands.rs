//! Inputs for the order commands that carry more than a couple of fields.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use super::{BuyerId, CartId, FeeRate, LineItem, Money, SellerId};

/// Creates one seller's order from a checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: AggregateId,
    pub buyer_id: BuyerId,
    pub seller_id: SellerId,
    pub cart_id: Option<CartId>,
    pub payment_intent_id: String,
    pub line_items: Vec<LineItem>,
    /// This order's share of the checkout's shipping fee.
    pub shipping_fee: Money,
    pub placed_at: DateTime<Utc>,
}

/// Marks a verified, stock-reserved order as paid.
#[derive(Debug, Clone)]
pub struct ConfirmPayment {
    pub payment_ref: String,
    pub payment_method: String,
    pub transaction_id: AggregateId,
    /// Platform fee in force at verification time.
    pub fee_rate: FeeRate,
    pub confirmed_at: DateTime<Utc>,
}
