use chrono::{Duration, Utc};
use common::AggregateId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    Actor, Aggregate, BuyerId, ConfirmPayment, FeeRate, LineItem, Money, Order, OrderEvent,
    OrderService, PlaceOrder, ProductId, SellerId, ShipmentDetails,
};
use event_store::InMemoryEventStore;

fn place_cmd() -> PlaceOrder {
    PlaceOrder {
        order_id: AggregateId::new(),
        buyer_id: BuyerId::new(),
        seller_id: SellerId::new(),
        cart_id: None,
        payment_intent_id: "pi_bench".to_string(),
        line_items: vec![
            LineItem::new(ProductId::new(), 2, 5, Money::from_cents(100)),
            LineItem::new(ProductId::new(), 1, 12, Money::from_cents(45)),
        ],
        shipping_fee: Money::from_cents(80),
        placed_at: Utc::now(),
    }
}

fn confirm_cmd() -> ConfirmPayment {
    ConfirmPayment {
        payment_ref: "pay_bench".to_string(),
        payment_method: "card".to_string(),
        transaction_id: AggregateId::new(),
        fee_rate: FeeRate::from_bps(500).unwrap(),
        confirmed_at: Utc::now(),
    }
}

fn bench_place_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = OrderService::new(InMemoryEventStore::new());

    c.bench_function("domain/place_order", |b| {
        b.iter(|| {
            rt.block_on(async {
                service.place_order(place_cmd()).await.unwrap();
            });
        });
    });
}

fn advance(
    order: &mut Order,
    log: &mut Vec<OrderEvent>,
    command: impl FnOnce(&Order) -> Result<Vec<OrderEvent>, domain::OrderError>,
) {
    let events = command(order).unwrap();
    log.extend(events.iter().cloned());
    order.apply_events(events);
}

fn bench_lifecycle_replay(c: &mut Criterion) {
    let now = Utc::now();
    let mut order = Order::default();
    let mut events = Vec::new();
    let shipment = ShipmentDetails {
        shipment_id: "S1".to_string(),
        awb_code: "AWB1".to_string(),
        courier_name: "Delhivery".to_string(),
        tracking_url: None,
        estimated_delivery: None,
    };

    advance(&mut order, &mut events, |o| o.place(place_cmd()));
    advance(&mut order, &mut events, |o| o.confirm_payment(confirm_cmd()));
    advance(&mut order, &mut events, |o| o.start_processing(now));
    advance(&mut order, &mut events, |o| o.pack(Actor::System, now));
    advance(&mut order, &mut events, |o| o.ship(shipment, Actor::System, now));
    advance(&mut order, &mut events, |o| {
        o.deliver(Actor::Carrier, now, Duration::days(7))
    });

    c.bench_function("domain/replay_full_lifecycle", |b| {
        b.iter(|| {
            let mut replayed = Order::default();
            replayed.apply_events(events.iter().cloned());
            replayed
        });
    });
}

criterion_group!(benches, bench_place_order, bench_lifecycle_replay);
criterion_main!(benches);
