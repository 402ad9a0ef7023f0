//! Concurrency properties of the stock ledger.

use std::sync::Arc;

use chrono::Duration;
use common::Sku;
use inventory::{InventoryError, ManualClock, StockLedger, StockLevel};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_no_overselling_under_concurrent_reserves() {
    let ledger = StockLedger::new();
    let sku = Sku::new("SKU-HOT");
    ledger.restock(&sku, 25).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..200 {
        let ledger = ledger.clone();
        let sku = sku.clone();
        handles.push(tokio::spawn(async move { ledger.reserve(&sku, 1).await }));
    }

    let mut successes = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(InventoryError::InsufficientStock { .. }) => insufficient += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(successes, 25);
    assert_eq!(insufficient, 175);
    assert_eq!(
        ledger.stock_level(&sku).await.unwrap(),
        StockLevel {
            available: 0,
            reserved: 25
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_sku_order_does_not_deadlock() {
    let ledger = StockLedger::new();
    let a = Sku::new("SKU-A");
    let b = Sku::new("SKU-B");
    ledger.restock(&a, 1_000).await.unwrap();
    ledger.restock(&b, 1_000).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..100 {
        let ledger = ledger.clone();
        let (first, second) = if i % 2 == 0 {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        };
        handles.push(tokio::spawn(async move {
            let r1 = ledger.reserve(&first, 1).await.unwrap();
            let r2 = ledger.reserve(&second, 1).await.unwrap();
            ledger.commit(r1).await.unwrap();
            ledger.release(r2).await.unwrap();
        }));
    }

    let all = join_all(handles);
    tokio::time::timeout(std::time::Duration::from_secs(10), all)
        .await
        .expect("reservations deadlocked");

    let total: u64 = ledger.stock_level(&a).await.unwrap().on_hand()
        + ledger.stock_level(&b).await.unwrap().on_hand();
    assert_eq!(total, 2_000 - 100);
    assert_eq!(ledger.active_reservation_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweep_races_with_commits_without_losing_units() {
    let clock = ManualClock::default();
    let ledger = StockLedger::with_clock(Arc::new(clock.clone()), Duration::minutes(15));
    let sku = Sku::new("SKU-RACE");
    ledger.restock(&sku, 100).await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..100 {
        ids.push(ledger.reserve(&sku, 1).await.unwrap());
    }
    clock.advance(Duration::minutes(15));

    let sweeper = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.expire_sweep(ledger.now()).await.len() })
    };
    let committers: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.commit(id).await })
        })
        .collect();

    sweeper.await.unwrap();
    for handle in committers {
        assert!(matches!(
            handle.await.unwrap(),
            Err(InventoryError::ReservationExpired(_))
        ));
    }

    assert_eq!(
        ledger.stock_level(&sku).await.unwrap(),
        StockLevel {
            available: 100,
            reserved: 0
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_many_skus_reserve_and_commit_independently() {
    let ledger = StockLedger::new();
    let skus: Vec<_> = (0..16).map(|i| Sku::new(format!("SKU-{i:03}"))).collect();
    for sku in &skus {
        ledger.restock(sku, 20).await.unwrap();
    }

    let mut handles = Vec::new();
    for round in 0..160 {
        let ledger = ledger.clone();
        let sku = skus[round % skus.len()].clone();
        handles.push(tokio::spawn(async move {
            let id = ledger.reserve(&sku, 1).await.unwrap();
            assert_eq!(ledger.reservation(id).await.unwrap().sku, sku);
            if (round / 16) % 2 == 0 {
                ledger.commit(id).await.unwrap();
            } else {
                ledger.release(id).await.unwrap();
            }
        }));
    }
    join_all(handles).await;

    for sku in &skus {
        assert_eq!(
            ledger.stock_level(sku).await.unwrap(),
            StockLevel {
                available: 15,
                reserved: 0
            }
        );
    }
    assert_eq!(ledger.active_reservation_count().await, 0);
}

async fn join_all(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        handle.await.unwrap();
    }
}
