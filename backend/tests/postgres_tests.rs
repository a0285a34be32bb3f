//! PostgreSQL store tests
//!
//! These run against the database named by `LEDGER_TEST_DATABASE_URL` and
//! return early when it is unset. Every test works on fresh random keys, so
//! a shared scratch database is fine.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use shared::{LedgerReference, MovementType, PositionKey};
use stock_ledger::config::{IsolationLevel, LedgerConfig};
use stock_ledger::services::{retry_busy, LedgerEntryDraft, RetryPolicy, StockLedger};
use stock_ledger::store::{LedgerStore, PgStore};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn key() -> PositionKey {
    PositionKey::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
}

async fn pg_store(isolation: IsolationLevel) -> Option<Arc<dyn LedgerStore>> {
    let url = std::env::var("LEDGER_TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&url)
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let config = LedgerConfig {
        isolation,
        ..LedgerConfig::default()
    };
    Some(Arc::new(PgStore::new(pool, &config)))
}

fn inbound(key: &PositionKey, qty: &str) -> LedgerEntryDraft {
    LedgerEntryDraft::new(
        key.clone(),
        MovementType::In,
        dec(qty),
        LedgerReference::manual(),
        Uuid::new_v4(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_postings_to_a_new_position_all_count() {
    for isolation in [IsolationLevel::ReadCommitted, IsolationLevel::Serializable] {
        let Some(store) = pg_store(isolation).await else {
            return;
        };
        let key = key();
        let policy = RetryPolicy {
            retries: 20,
            backoff: std::time::Duration::from_millis(5),
        };

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = StockLedger::new(store.clone());
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                retry_busy(&policy, || ledger.post(inbound(&key, "5"))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let ledger = StockLedger::new(store);
        let position = ledger.get_position(&key).await.unwrap();
        assert_eq!(position.quantity, dec("40"), "isolation {isolation:?}");
        assert!(ledger.reconcile(&key).await.unwrap().matches);
    }
}

#[tokio::test]
async fn test_six_decimal_quantities_reconcile_exactly() {
    let Some(store) = pg_store(IsolationLevel::Serializable).await else {
        return;
    };
    let ledger = StockLedger::new(store);
    let key = key();

    ledger.post(inbound(&key, "0.000001")).await.unwrap();
    ledger.post(inbound(&key, "1.123456")).await.unwrap();

    let position = ledger.get_position(&key).await.unwrap();
    assert_eq!(position.quantity, dec("1.123457"));
    assert!(ledger.reconcile(&key).await.unwrap().matches);

    assert!(ledger.post(inbound(&key, "0.0000006")).await.is_err());
}

#[tokio::test]
async fn test_position_reads_skip_row_locks() {
    let Some(store) = pg_store(IsolationLevel::Serializable).await else {
        return;
    };
    let ledger = StockLedger::new(store.clone());
    let key = key();
    ledger.post(inbound(&key, "3")).await.unwrap();

    let mut open = store.begin().await.unwrap();
    open.lock_position(&key).await.unwrap().unwrap();

    let position = ledger.get_position(&key).await.unwrap();
    assert_eq!(position.quantity, dec("3"));
}
