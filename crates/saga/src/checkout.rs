//! Checkout: turns a cart or a single product into one order per seller
//! under a shared payment intent.
//!
//! Stock is only checked here, never taken. Reservation happens when the
//! payment is verified.

use std::collections::BTreeMap;
use std::time::Instant;

use common::AggregateId;
use domain::{BuyerId, CartId, LineItem, Money, PlaceOrder, ProductId, SellerId};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::coordinator::OrderSaga;
use crate::error::{Result, SagaError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutLine {
    pub product_id: ProductId,
    pub lot_quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub buyer_id: BuyerId,
    pub cart_id: Option<CartId>,
    pub lines: Vec<CheckoutLine>,
    /// Cart-level shipping, split across sellers by subtotal.
    #[serde(default)]
    pub shipping_fee: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    pub order_id: AggregateId,
    pub seller_id: SellerId,
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub grand_total: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub payment_intent_id: String,
    pub orders: Vec<PlacedOrder>,
    pub amount: Money,
}

impl<S> OrderSaga<S>
where
    S: EventStore + Clone + 'static,
{
    /// Checks out a stored cart. The cart stays until its orders settle.
    #[tracing::instrument(skip(self))]
    pub async fn checkout_cart(&self, cart_id: CartId, shipping_fee: Money) -> Result<CheckoutReceipt> {
        let cart = self
            .carts
            .get(cart_id)
            .await?
            .ok_or_else(|| SagaError::Validation(format!("cart {cart_id} not found")))?;

        self.checkout(CheckoutRequest {
            buyer_id: cart.buyer_id,
            cart_id: Some(cart.cart_id),
            lines: cart
                .lines
                .into_iter()
                .map(|l| CheckoutLine {
                    product_id: l.product_id,
                    lot_quantity: l.lot_quantity,
                })
                .collect(),
            shipping_fee,
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn buy_now(
        &self,
        buyer_id: BuyerId,
        product_id: ProductId,
        lot_quantity: u32,
        shipping_fee: Money,
    ) -> Result<CheckoutReceipt> {
        self.checkout(CheckoutRequest {
            buyer_id,
            cart_id: None,
            lines: vec![CheckoutLine {
                product_id,
                lot_quantity,
            }],
            shipping_fee,
        })
        .await
    }

    #[tracing::instrument(skip(self, request), fields(buyer_id = %request.buyer_id, lines = request.lines.len()))]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        let started = Instant::now();
        if request.lines.is_empty() {
            return Err(SagaError::Validation("checkout has no items".to_string()));
        }
        if request.shipping_fee.cents() < 0 {
            return Err(SagaError::Validation("shipping fee cannot be negative".to_string()));
        }

        let by_seller = self.price_lines(&request.lines).await?;
        let subtotals: Vec<Money> = by_seller
            .values()
            .map(|lines| lines.iter().map(|l| l.line_total).sum())
            .collect();
        let shipping_shares = request.shipping_fee.allocate(&subtotals);
        let amount = subtotals.iter().copied().sum::<Money>() + request.shipping_fee;

        let payment_intent_id = self
            .payments
            .create_payment_intent(amount, &request.buyer_id.to_string())
            .await?;

        let placed_at = self.now();
        let mut orders = Vec::with_capacity(by_seller.len());
        for ((seller_id, line_items), shipping_fee) in by_seller.into_iter().zip(shipping_shares) {
            let order_id = AggregateId::new();
            let result = self
                .orders
                .place_order(PlaceOrder {
                    order_id,
                    buyer_id: request.buyer_id,
                    seller_id,
                    cart_id: request.cart_id,
                    payment_intent_id: payment_intent_id.clone(),
                    line_items,
                    shipping_fee,
                    placed_at,
                })
                .await?;

            orders.push(PlacedOrder {
                order_id,
                seller_id,
                subtotal: result.aggregate.subtotal(),
                shipping_fee,
                grand_total: result.aggregate.grand_total(),
            });
        }

        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(%payment_intent_id, orders = orders.len(), %amount, "checkout placed");

        Ok(CheckoutReceipt {
            payment_intent_id,
            orders,
            amount,
        })
    }

    /// Prices each line from the ledger and groups the lines by seller.
    /// Repeated products are merged; sellers come out in id order.
    async fn price_lines(&self, lines: &[CheckoutLine]) -> Result<BTreeMap<SellerId, Vec<LineItem>>> {
        let mut lots: Vec<(ProductId, u32)> = Vec::new();
        for line in lines {
            if line.lot_quantity == 0 {
                return Err(SagaError::Validation(format!(
                    "product {} needs a positive lot quantity",
                    line.product_id
                )));
            }
            match lots.iter_mut().find(|(id, _)| *id == line.product_id) {
                Some((_, total)) => *total = total.saturating_add(line.lot_quantity),
                None => lots.push((line.product_id, line.lot_quantity)),
            }
        }

        let mut by_seller: BTreeMap<SellerId, Vec<LineItem>> = BTreeMap::new();
        for (product_id, lot_quantity) in lots {
            let listing = self
                .inventory
                .product(product_id)
                .await?
                .ok_or_else(|| SagaError::Validation(format!("product {product_id} not found")))?;

            let item = LineItem::new(product_id, lot_quantity, listing.lot_size, listing.unit_price);
            if listing.quantity_available < item.units() {
                return Err(SagaError::InsufficientStock {
                    product_id,
                    available_lots: listing.available_lots(),
                });
            }
            by_seller.entry(listing.seller_id).or_default().push(item);
        }
        Ok(by_seller)
    }
}
