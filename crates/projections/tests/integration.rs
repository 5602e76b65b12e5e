//! Services write to the store, the processor catches the views up.

use std::sync::Arc;

use chrono::Duration;
use common::{AggregateId, Clock, ManualClock};
use domain::{
    Actor, BuyerId, ConfirmPayment, FeeRate, LineItem, Money, OrderService, OrderStatus,
    PaymentStatus, PlaceOrder, ProductId, RecordTransaction, SellerId, SettlementService,
    transaction_id_for,
};
use event_store::InMemoryEventStore;
use projections::{OrderDirectoryView, PayoutLedgerView, ProjectionProcessor};

struct Harness {
    clock: ManualClock,
    orders: OrderService<InMemoryEventStore>,
    ledger: SettlementService<InMemoryEventStore>,
    processor: ProjectionProcessor<InMemoryEventStore>,
    directory: OrderDirectoryView,
    payouts: PayoutLedgerView,
}

fn harness() -> Harness {
    let store = InMemoryEventStore::new();
    let clock = ManualClock::default();
    let shared: common::SharedClock = Arc::new(clock.clone());

    let directory = OrderDirectoryView::new();
    let payouts = PayoutLedgerView::new();
    let mut processor = ProjectionProcessor::new(store.clone());
    processor.register(Box::new(directory.clone()));
    processor.register(Box::new(payouts.clone()));

    Harness {
        orders: OrderService::with_clock(store.clone(), Arc::clone(&shared)),
        ledger: SettlementService::with_clock(store, shared),
        clock,
        processor,
        directory,
        payouts,
    }
}

fn place(h: &Harness, intent: &str, seller_id: SellerId) -> PlaceOrder {
    PlaceOrder {
        order_id: AggregateId::new(),
        buyer_id: BuyerId::new(),
        seller_id,
        cart_id: None,
        payment_intent_id: intent.to_string(),
        line_items: vec![LineItem::new(ProductId::new(), 2, 5, Money::from_cents(100))],
        shipping_fee: Money::zero(),
        placed_at: h.clock.now(),
    }
}

#[tokio::test]
async fn directory_tracks_checkout_siblings() {
    let h = harness();
    for _ in 0..2 {
        h.orders
            .place_order(place(&h, "pi_multi", SellerId::new()))
            .await
            .unwrap();
    }
    let lone = place(&h, "pi_single", SellerId::new());
    let lone_id = lone.order_id;
    h.orders.place_order(lone).await.unwrap();

    h.clock.advance(Duration::minutes(31));
    h.orders
        .fail_payment(lone_id, "abandoned", Actor::System)
        .await
        .unwrap();
    h.processor.run_catch_up().await.unwrap();

    assert_eq!(h.directory.by_payment_intent("pi_multi").await.len(), 2);
    let stale = h
        .directory
        .awaiting_payment_since(h.clock.now() - Duration::minutes(30))
        .await;
    assert_eq!(stale.len(), 2);

    let lone = h.directory.get(lone_id).await.unwrap();
    assert_eq!(lone.status, OrderStatus::Cancelled);
    assert_eq!(lone.payment_status, PaymentStatus::Failed);
}

#[tokio::test]
async fn delivered_orders_surface_when_window_closes() {
    let h = harness();
    let cmd = place(&h, "pi_1", SellerId::new());
    let order_id = cmd.order_id;
    h.orders.place_order(cmd).await.unwrap();
    h.orders
        .confirm_payment(
            order_id,
            ConfirmPayment {
                payment_ref: "pay_1".to_string(),
                payment_method: "card".to_string(),
                transaction_id: transaction_id_for(order_id),
                fee_rate: FeeRate::from_bps(500).unwrap(),
                confirmed_at: h.clock.now(),
            },
        )
        .await
        .unwrap();
    h.orders
        .ship(
            order_id,
            domain::ShipmentDetails {
                shipment_id: "S-1".to_string(),
                awb_code: "AWB-1".to_string(),
                courier_name: "Xpressbees".to_string(),
                tracking_url: None,
                estimated_delivery: None,
            },
            Actor::System,
        )
        .await
        .unwrap();
    h.orders
        .deliver(order_id, Actor::Carrier, Duration::days(7))
        .await
        .unwrap();
    h.processor.run_catch_up().await.unwrap();

    assert!(h.directory.return_window_elapsed(h.clock.now()).await.is_empty());
    let later = h.clock.now() + Duration::days(8);
    let due = h.directory.return_window_elapsed(later).await;
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].order_id, order_id);
}

#[tokio::test]
async fn payout_ledger_follows_transactions() {
    let h = harness();
    let seller_id = SellerId::new();
    let order_id = AggregateId::new();

    h.ledger
        .record(RecordTransaction {
            order_id,
            buyer_id: BuyerId::new(),
            seller_id,
            amount: Money::from_cents(1000),
            fee_rate: FeeRate::from_bps(500).unwrap(),
            payment_method: "card".to_string(),
            payment_ref: "pay_1".to_string(),
        })
        .await
        .unwrap();
    h.ledger
        .schedule_payout(order_id, h.clock.now() + Duration::days(7))
        .await
        .unwrap();
    h.processor.run_catch_up().await.unwrap();
    assert!(h.payouts.due_for_eligibility(h.clock.now()).await.is_empty());

    h.clock.advance(Duration::days(7));
    h.ledger.promote_eligible(order_id).await.unwrap();
    h.processor.run_catch_up().await.unwrap();

    let pending = h.payouts.pending_payouts().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].seller_id, seller_id);
    assert_eq!(pending[0].total_net, Money::from_cents(950));
}
