//! Ledger integration tests against a live PostgreSQL
//!
//! Run with `DATABASE_URL=postgresql://... cargo test -- --ignored`.
//! Each test uses a fresh user so repeated runs do not interfere.

use std::sync::Arc;
use tally_core::clock::SystemClock;
use tally_core::AppError;
use tally_db::{create_pool, init_schema};
use tally_services::LedgerService;
use uuid::Uuid;

async fn ledger() -> LedgerService {
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/tally_billing".to_string());
    let pool = create_pool(&database_url, Some(5), Some(5000))
        .await
        .expect("database available");
    init_schema(&pool).await.expect("schema bootstrap");
    LedgerService::new(pool, Arc::new(SystemClock), 30)
}

fn key(prefix: &str) -> String {
    format!("{prefix}:{}", Uuid::new_v4())
}

#[tokio::test]
#[ignore] // Requires database
async fn happy_path_reserve_then_partial_commit() {
    let ledger = ledger().await;
    let user = Uuid::new_v4();

    ledger
        .credit_purchase(user, 5000, &key("purchase"), None, "test", None)
        .await
        .unwrap();

    let reserve = ledger
        .reserve(user, 1000, Some("job-1"), "test", &key("reserve"))
        .await
        .unwrap();
    let balance = ledger.get_balance(user).await.unwrap();
    assert_eq!(balance.available, 4000);
    assert_eq!(balance.reserved, 1000);

    let commit = ledger
        .commit(reserve.reservation.id, 600, "test", &key("commit"))
        .await
        .unwrap();
    assert_eq!(commit.committed, 600);
    assert_eq!(commit.released, 400);

    let balance = ledger.get_balance(user).await.unwrap();
    assert_eq!(balance.available, 4400);
    assert_eq!(balance.reserved, 0);
}

#[tokio::test]
#[ignore] // Requires database
async fn over_commit_rejected_reservation_stays_active() {
    let ledger = ledger().await;
    let user = Uuid::new_v4();

    ledger
        .credit_purchase(user, 5000, &key("purchase"), None, "test", None)
        .await
        .unwrap();
    let reserve = ledger
        .reserve(user, 1000, None, "test", &key("reserve"))
        .await
        .unwrap();

    let err = ledger
        .commit(reserve.reservation.id, 1500, "test", &key("commit"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::CommitExceedsReserved { .. }));

    let balance = ledger.get_balance(user).await.unwrap();
    assert_eq!(balance.available, 4000);
    assert_eq!(balance.reserved, 1000);

    // Still active: a later release succeeds
    let release = ledger
        .release(reserve.reservation.id, "test cleanup", "test", &key("release"))
        .await
        .unwrap();
    assert_eq!(release.released, 1000);
}

#[tokio::test]
#[ignore] // Requires database
async fn purchase_credit_is_idempotent() {
    let ledger = ledger().await;
    let user = Uuid::new_v4();
    let shared_key = key("purchase");

    let first = ledger
        .credit_purchase(user, 500, &shared_key, Some("cs_x"), "test", None)
        .await
        .unwrap();
    assert!(!first.replayed);

    let second = ledger
        .credit_purchase(user, 500, &shared_key, Some("cs_x"), "test", None)
        .await
        .unwrap();
    assert!(second.replayed);

    let balance = ledger.get_balance(user).await.unwrap();
    assert_eq!(balance.available, 500);
}

#[tokio::test]
#[ignore] // Requires database
async fn same_key_different_amount_conflicts() {
    let ledger = ledger().await;
    let user = Uuid::new_v4();
    let shared_key = key("purchase");

    ledger
        .credit_purchase(user, 500, &shared_key, None, "test", None)
        .await
        .unwrap();
    let err = ledger
        .credit_purchase(user, 900, &shared_key, None, "test", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::IdempotencyConflict(_)));
}

#[tokio::test]
#[ignore] // Requires database
async fn release_retry_returns_prior_amount() {
    let ledger = ledger().await;
    let user = Uuid::new_v4();

    ledger
        .credit_purchase(user, 2000, &key("purchase"), None, "test", None)
        .await
        .unwrap();
    let reserve = ledger
        .reserve(user, 800, None, "test", &key("reserve"))
        .await
        .unwrap();

    let shared_key = key("release");
    let first = ledger
        .release(reserve.reservation.id, "job aborted", "test", &shared_key)
        .await
        .unwrap();
    assert_eq!(first.released, 800);
    assert!(!first.replayed);

    let second = ledger
        .release(reserve.reservation.id, "job aborted", "test", &shared_key)
        .await
        .unwrap();
    assert_eq!(second.released, 800);
    assert!(second.replayed);
}

#[tokio::test]
#[ignore] // Requires database
async fn insufficient_tokens_reports_shortfall() {
    let ledger = ledger().await;
    let user = Uuid::new_v4();

    ledger
        .credit_purchase(user, 400, &key("purchase"), None, "test", None)
        .await
        .unwrap();

    let err = ledger
        .reserve(user, 1000, None, "test", &key("reserve"))
        .await
        .unwrap_err();
    match err {
        AppError::InsufficientTokens {
            available,
            requested,
            shortfall,
        } => {
            assert_eq!(available, 400);
            assert_eq!(requested, 1000);
            assert_eq!(shortfall, 600);
        }
        other => panic!("unexpected error: {other}"),
    }
}
