use common::Sku;
use criterion::{Criterion, criterion_group, criterion_main};
use inventory::StockLedger;

fn bench_reserve_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ledger = StockLedger::new();
    let sku = Sku::new("SKU-BENCH");
    rt.block_on(async { ledger.restock(&sku, 1_000_000).await.unwrap() });

    c.bench_function("ledger/reserve_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                let id = ledger.reserve(&sku, 1).await.unwrap();
                ledger.release(id).await.unwrap();
            });
        });
    });
}

fn bench_reserve_commit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ledger = StockLedger::new();
    let sku = Sku::new("SKU-BENCH");
    rt.block_on(async { ledger.restock(&sku, u32::MAX).await.unwrap() });

    c.bench_function("ledger/reserve_commit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let id = ledger.reserve(&sku, 1).await.unwrap();
                ledger.commit(id).await.unwrap();
            });
        });
    });
}

fn bench_contended_reserves(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("ledger/contended_reserve_64", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ledger = StockLedger::new();
                let sku = Sku::new("SKU-HOT");
                ledger.restock(&sku, 32).await.unwrap();
                let handles: Vec<_> = (0..64)
                    .map(|_| {
                        let ledger = ledger.clone();
                        let sku = sku.clone();
                        tokio::spawn(async move { ledger.reserve(&sku, 1).await.is_ok() })
                    })
                    .collect();
                for handle in handles {
                    handle.await.unwrap();
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_reserve_release,
    bench_reserve_commit,
    bench_contended_reserves
);
criterion_main!(benches);
