//! Order directory: one row per order, indexed for the background workers
//! and the order listing endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Aggregate, BuyerId, Money, Order, OrderEvent, OrderStatus, PaymentStatus, SellerId};
use event_store::EventEnvelope;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

#[derive(Debug, Clone)]
pub struct OrderSummary {
    pub order_id: AggregateId,
    pub buyer_id: BuyerId,
    pub seller_id: SellerId,
    pub payment_intent_id: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub grand_total: Money,
    pub placed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub return_window_expires_at: Option<DateTime<Utc>>,
    pub verification_lease_until: Option<DateTime<Utc>>,
    /// A refund is owed and the gateway has not accepted it yet.
    pub refund_pending: bool,
}

impl OrderSummary {
    fn from_order(order: &Order, updated_at: DateTime<Utc>) -> Option<Self> {
        Some(Self {
            order_id: order.id()?,
            buyer_id: order.buyer_id()?,
            seller_id: order.seller_id()?,
            payment_intent_id: order.payment_intent_id().to_string(),
            status: order.status(),
            payment_status: order.payment_status(),
            grand_total: order.grand_total(),
            placed_at: order.placed_at()?,
            updated_at,
            confirmed_at: order.confirmed_at(),
            delivered_at: order.delivered_at(),
            return_window_expires_at: order.return_window_expires_at(),
            verification_lease_until: order.verification_lease_until(),
            refund_pending: order.refund_pending(),
        })
    }
}

/// Directory of every order.
///
/// Each row is derived by folding the order's events through the same
/// `apply` the write side uses, so status and payment status never drift
/// from the aggregate.
#[derive(Clone, Default)]
pub struct OrderDirectoryView {
    orders: Arc<RwLock<HashMap<AggregateId, Order>>>,
    summaries: Arc<RwLock<HashMap<AggregateId, OrderSummary>>>,
    position: Arc<RwLock<ProjectionPosition>>,
}

impl OrderDirectoryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, order_id: AggregateId) -> Option<OrderSummary> {
        self.summaries.read().await.get(&order_id).cloned()
    }

    async fn select(&self, keep: impl Fn(&OrderSummary) -> bool) -> Vec<OrderSummary> {
        let mut rows: Vec<_> = self
            .summaries
            .read()
            .await
            .values()
            .filter(|s| keep(s))
            .cloned()
            .collect();
        rows.sort_by_key(|s| (s.placed_at, s.order_id));
        rows
    }

    pub async fn by_status(&self, status: OrderStatus) -> Vec<OrderSummary> {
        self.select(|s| s.status == status).await
    }

    pub async fn by_payment_intent(&self, payment_intent_id: &str) -> Vec<OrderSummary> {
        self.select(|s| s.payment_intent_id == payment_intent_id)
            .await
    }

    pub async fn for_buyer(&self, buyer_id: BuyerId) -> Vec<OrderSummary> {
        self.select(|s| s.buyer_id == buyer_id).await
    }

    pub async fn for_seller(&self, seller_id: SellerId) -> Vec<OrderSummary> {
        self.select(|s| s.seller_id == seller_id).await
    }

    /// Orders still awaiting payment that were placed before `cutoff`.
    pub async fn awaiting_payment_since(&self, cutoff: DateTime<Utc>) -> Vec<OrderSummary> {
        self.select(|s| s.status == OrderStatus::PaymentPending && s.placed_at < cutoff)
            .await
    }

    /// Paid orders still waiting out the grace period before processing.
    pub async fn awaiting_processing(&self) -> Vec<OrderSummary> {
        self.select(|s| s.status == OrderStatus::Confirmed && s.confirmed_at.is_some())
            .await
    }

    /// Orders whose return window closed before `now` and can be completed.
    pub async fn return_window_elapsed(&self, now: DateTime<Utc>) -> Vec<OrderSummary> {
        self.select(|s| {
            matches!(s.status, OrderStatus::Delivered | OrderStatus::ReturnRejected)
                && s.return_window_expires_at.is_some_and(|at| at < now)
        })
        .await
    }

    pub async fn refunds_pending(&self) -> Vec<OrderSummary> {
        self.select(|s| s.refund_pending).await
    }
}

#[async_trait]
impl Projection for OrderDirectoryView {
    fn name(&self) -> &'static str {
        "OrderDirectoryView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        if event.aggregate_type == Order::aggregate_type() {
            let order_event: OrderEvent = event.decode()?;
            let mut orders = self.orders.write().await;
            let order = orders.entry(event.aggregate_id).or_default();
            order.apply(order_event);
            order.set_version(event.version);

            if let Some(summary) = OrderSummary::from_order(order, event.timestamp) {
                self.summaries
                    .write()
                    .await
                    .insert(event.aggregate_id, summary);
            }
        }

        let mut pos = self.position.write().await;
        *pos = pos.advance(event);
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        *self.position.read().await
    }

    async fn reset(&self) -> Result<()> {
        self.orders.write().await.clear();
        self.summaries.write().await.clear();
        *self.position.write().await = ProjectionPosition::zero();
        Ok(())
    }
}

impl ReadModel for OrderDirectoryView {
    fn name(&self) -> &'static str {
        "OrderDirectoryView"
    }

    fn count(&self) -> usize {
        self.summaries.try_read().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use domain::{Actor, DomainEvent, LineItem, PlaceOrder, ProductId};
    use event_store::Version;

    fn envelope(
        order_id: AggregateId,
        version: i64,
        at: DateTime<Utc>,
        event: &OrderEvent,
    ) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(order_id)
            .aggregate_type("Order")
            .event_type(event.event_type())
            .version(Version::new(version))
            .timestamp(at)
            .payload(event)
            .unwrap()
            .build()
            .unwrap()
    }

    fn placed(intent: &str, at: DateTime<Utc>) -> (AggregateId, OrderEvent) {
        let cmd = PlaceOrder {
            order_id: AggregateId::new(),
            buyer_id: BuyerId::new(),
            seller_id: SellerId::new(),
            cart_id: None,
            payment_intent_id: intent.to_string(),
            line_items: vec![LineItem::new(ProductId::new(), 1, 1, Money::from_cents(500))],
            shipping_fee: Money::zero(),
            placed_at: at,
        };
        let id = cmd.order_id;
        let mut events = Order::default().place(cmd).unwrap();
        (id, events.remove(0))
    }

    #[tokio::test]
    async fn stale_pending_orders_are_listed_oldest_first() {
        let view = OrderDirectoryView::new();
        let now = Utc::now();

        let (old, e1) = placed("pi_a", now - Duration::minutes(45));
        let (older, e2) = placed("pi_b", now - Duration::minutes(90));
        let (fresh, e3) = placed("pi_c", now - Duration::minutes(5));
        view.handle(&envelope(old, 1, now, &e1)).await.unwrap();
        view.handle(&envelope(older, 1, now, &e2)).await.unwrap();
        view.handle(&envelope(fresh, 1, now, &e3)).await.unwrap();

        let stale = view.awaiting_payment_since(now - Duration::minutes(30)).await;
        let ids: Vec<_> = stale.iter().map(|s| s.order_id).collect();
        assert_eq!(ids, vec![older, old]);
    }

    #[tokio::test]
    async fn cancellation_moves_order_out_of_pending() {
        let view = OrderDirectoryView::new();
        let now = Utc::now();
        let (id, placed_event) = placed("pi_a", now - Duration::hours(1));
        view.handle(&envelope(id, 1, now, &placed_event)).await.unwrap();

        let mut order = Order::default();
        order.apply(placed_event);
        let cancelled = order.fail_payment("abandoned", Actor::System, now).unwrap();
        view.handle(&envelope(id, 2, now, &cancelled[0])).await.unwrap();

        let row = view.get(id).await.unwrap();
        assert_eq!(row.status, OrderStatus::Cancelled);
        assert_eq!(row.payment_status, PaymentStatus::Failed);
        assert!(view.awaiting_payment_since(now).await.is_empty());
        assert_eq!(view.by_payment_intent("pi_a").await.len(), 1);
    }

    #[tokio::test]
    async fn other_aggregates_only_advance_position() {
        let view = OrderDirectoryView::new();
        let other = EventEnvelope::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("Transaction")
            .event_type("TransactionRecorded")
            .version(Version::first())
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap();

        view.handle(&other).await.unwrap();

        assert_eq!(view.position().await.events_processed, 1);
        assert_eq!(ReadModel::count(&view), 0);
    }
}
