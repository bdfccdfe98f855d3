//! Concurrency tests
//!
//! Many tasks hit one shared engine at once. Row locks must serialize the
//! conflicting operations without deadlock and without breaking the balance
//! invariants.

use std::sync::Arc;
use std::time::Duration;
use user_balance_ledger::types::{Deposit, Reservation, Settlement, Transfer};
use user_balance_ledger::{BalanceEngine, BalanceError, MemoryStore, Store};

const USERS: i64 = 4;
const INITIAL: i64 = 1_000;

async fn funded_engine() -> Arc<BalanceEngine<MemoryStore>> {
    // A lock timeout turns a deadlock into a test failure instead of a hang
    let store = MemoryStore::with_lock_timeout(Some(Duration::from_secs(5)))
        .with_services([(1, "Delivery")]);
    let engine = BalanceEngine::new(store);
    for user_id in 1..=USERS {
        engine
            .replenish(Deposit {
                user_id,
                amount: INITIAL,
                date: None,
            })
            .await
            .unwrap();
    }
    Arc::new(engine)
}

async fn total(engine: &BalanceEngine<MemoryStore>) -> i64 {
    engine
        .store()
        .accounts()
        .await
        .unwrap()
        .iter()
        .map(|snapshot| snapshot.balance + snapshot.reserved)
        .sum()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposing_transfers_conserve_total() {
    let engine = funded_engine().await;

    let mut handles = Vec::new();
    for i in 0..200i64 {
        let engine = Arc::clone(&engine);
        let from = i % USERS + 1;
        let to = (i + 1) % USERS + 1;
        // Every pair also runs in the opposite direction
        let (from, to) = if i % 2 == 0 { (from, to) } else { (to, from) };
        handles.push(tokio::spawn(async move {
            engine
                .transfer(Transfer {
                    from_user_id: from,
                    to_user_id: to,
                    amount: 7,
                    date: None,
                })
                .await
        }));
    }

    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) | Err(BalanceError::InsufficientFunds { .. }) => {}
            Err(other) => panic!("unexpected transfer error: {}", other),
        }
    }

    assert_eq!(total(&engine).await, USERS * INITIAL);
    for snapshot in engine.store().accounts().await.unwrap() {
        assert!(snapshot.balance >= 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_never_overdraw() {
    let engine = funded_engine().await;

    let mut handles = Vec::new();
    for order_id in 0..50 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .reserve(Reservation {
                    user_id: 1,
                    service_id: 1,
                    order_id,
                    amount: 30,
                    date: None,
                })
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(BalanceError::InsufficientFunds { .. }) => {}
            Err(other) => panic!("unexpected reservation error: {}", other),
        }
    }

    // 1000 / 30 leaves room for exactly 33 reservations
    assert_eq!(succeeded, 33);
    assert_eq!(engine.get_balance(1).await.unwrap().balance, INITIAL - 33 * 30);
    assert_eq!(engine.get_reserve(1).await.unwrap().balance, 33 * 30);
    assert_eq!(engine.store().open_reservations(), 33);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_settlements_apply_once() {
    let engine = funded_engine().await;
    let reservation = Reservation {
        user_id: 2,
        service_id: 1,
        order_id: 9,
        amount: 100,
        date: None,
    };
    let id = engine.reserve(reservation).await.unwrap();
    let settlement = Settlement::of(id, &reservation);

    let mut handles = Vec::new();
    for i in 0..10 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                engine.confirm(settlement).await
            } else {
                engine.cancel_reservation(settlement).await
            }
        }));
    }

    let mut settled = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => settled += 1,
            Err(BalanceError::ReservationNotFound { .. }) => {}
            Err(other) => panic!("unexpected settlement error: {}", other),
        }
    }

    assert_eq!(settled, 1);
    assert_eq!(engine.get_reserve(2).await.unwrap().balance, 0);
    let balance = engine.get_balance(2).await.unwrap().balance;
    let reported = engine.store().report_entries().len();
    // Either confirmed (spent, reported) or cancelled (refunded)
    assert!(
        (balance == INITIAL - 100 && reported == 1) || (balance == INITIAL && reported == 0)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_deposits_open_one_account() {
    let engine = Arc::new(BalanceEngine::new(MemoryStore::with_lock_timeout(Some(
        Duration::from_secs(5),
    ))));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .replenish(Deposit {
                    user_id: 42,
                    amount: 5,
                    date: None,
                })
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(engine.get_balance(42).await.unwrap().balance, 100);
    assert_eq!(engine.get_reserve(42).await.unwrap().balance, 0);
}
