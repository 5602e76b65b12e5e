use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use domain::{Money, ProductId, SellerId};
use saga::services::{InMemoryInventoryLedger, InventoryLedger, ProductListing};

async fn stocked_ledger(units: u64) -> (InMemoryInventoryLedger, ProductId) {
    let ledger = InMemoryInventoryLedger::new();
    let product_id = ProductId::new();
    ledger
        .upsert_product(ProductListing {
            product_id,
            seller_id: SellerId::new(),
            name: "Bench item".to_string(),
            unit_price: Money::from_cents(100),
            lot_size: 1,
            quantity_available: units,
            low_stock_threshold: 0,
        })
        .await
        .unwrap();
    (ledger, product_id)
}

fn bench_reserve_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (ledger, product_id) = rt.block_on(stocked_ledger(1_000_000));

    c.bench_function("inventory/reserve_release", |b| {
        b.to_async(&rt).iter(|| async {
            ledger.reserve(product_id, 5).await.unwrap();
            ledger.release(product_id, 5).await.unwrap();
        })
    });
}

fn bench_contended_reservations(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .build()
        .unwrap();
    let mut group = c.benchmark_group("inventory/contended");

    for tasks in [4usize, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            b.to_async(&rt).iter(|| async move {
                // half the contenders can be served
                let (ledger, product_id) = stocked_ledger(tasks as u64 / 2).await;
                let handles: Vec<_> = (0..tasks)
                    .map(|_| {
                        let ledger = ledger.clone();
                        tokio::spawn(async move { ledger.reserve(product_id, 1).await.is_ok() })
                    })
                    .collect();
                let mut granted = 0;
                for handle in handles {
                    granted += usize::from(handle.await.unwrap());
                }
                assert_eq!(granted, tasks / 2);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_reserve_release, bench_contended_reservations);
criterion_main!(benches);
