//! Schema bootstrap
//!
//! Idempotent `CREATE TABLE IF NOT EXISTS` statements for the ledger tables,
//! executed inside a single transaction. The check constraints encode the
//! ledger's sign conventions: reserved balances never go negative, REFUND
//! journal rows are stored with a non-positive amount, every other type is
//! non-negative.

use sqlx::PgPool;
use tally_core::{AppError, AppResult};
use tracing::info;

/// Create the ledger tables and indexes if they do not exist
pub async fn init_schema(pool: &PgPool) -> AppResult<()> {
    info!("Initializing ledger schema");

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::Transaction(format!("Failed to start transaction: {}", e)))?;

    // Balances
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS token_balances (
            user_id UUID PRIMARY KEY,
            available BIGINT NOT NULL DEFAULT 0,
            reserved BIGINT NOT NULL DEFAULT 0 CHECK (reserved >= 0),
            version BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::Database(format!("Failed to create token_balances: {}", e)))?;

    // Reservations
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS token_reservations (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL,
            estimated_tokens BIGINT NOT NULL CHECK (estimated_tokens > 0),
            committed_tokens BIGINT NOT NULL DEFAULT 0
                CHECK (committed_tokens >= 0 AND committed_tokens <= estimated_tokens),
            state TEXT NOT NULL
                CHECK (state IN ('active', 'committed', 'released', 'expired', 'cancelled')),
            job_ref TEXT,
            expires_at TIMESTAMPTZ NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::Database(format!("Failed to create token_reservations: {}", e)))?;

    // The expiry sweep scans active reservations by deadline
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_reservations_state_expires
        ON token_reservations(state, expires_at)
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::Database(format!("Failed to create reservation index: {}", e)))?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_reservations_user
        ON token_reservations(user_id, state)
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::Database(format!("Failed to create reservation user index: {}", e)))?;

    // Journal. The unique idempotency key is the at-most-once guarantee;
    // the REFUND sign constraint enforces the canonical negative storage.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS token_transactions (
            id BIGSERIAL PRIMARY KEY,
            user_id UUID NOT NULL,
            tx_type TEXT NOT NULL
                CHECK (tx_type IN ('PURCHASE', 'ADJUSTMENT', 'RESERVE', 'COMMIT', 'RELEASE', 'REFUND')),
            source TEXT NOT NULL,
            amount_tokens BIGINT NOT NULL
                CHECK (
                    (tx_type = 'REFUND' AND amount_tokens <= 0)
                    OR (tx_type <> 'REFUND' AND amount_tokens >= 0)
                ),
            ref_id TEXT,
            idempotency_key VARCHAR(255) NOT NULL UNIQUE,
            balance_after_available BIGINT NOT NULL,
            balance_after_reserved BIGINT NOT NULL,
            meta JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::Database(format!("Failed to create token_transactions: {}", e)))?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_transactions_user_created
        ON token_transactions(user_id, created_at)
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::Database(format!("Failed to create journal index: {}", e)))?;

    // Payments
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payments (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL,
            provider_session_id TEXT NOT NULL UNIQUE,
            provider_payment_intent_id TEXT,
            amount_cents BIGINT NOT NULL CHECK (amount_cents >= 0),
            currency TEXT NOT NULL,
            credited_tokens BIGINT NOT NULL CHECK (credited_tokens >= 0),
            refunded_amount_cents BIGINT NOT NULL DEFAULT 0 CHECK (refunded_amount_cents >= 0),
            status TEXT NOT NULL
                CHECK (status IN ('pending', 'succeeded', 'partially_refunded', 'refunded', 'failed')),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::Database(format!("Failed to create payments: {}", e)))?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_payments_payment_intent
        ON payments(provider_payment_intent_id)
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::Database(format!("Failed to create payment index: {}", e)))?;

    // Processed events
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processed_events (
            event_id TEXT PRIMARY KEY,
            received_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::Database(format!("Failed to create processed_events: {}", e)))?;

    // Product packs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_packs (
            id UUID PRIMARY KEY,
            provider_price_id TEXT NOT NULL UNIQUE,
            tokens BIGINT NOT NULL CHECK (tokens > 0),
            price_cents BIGINT NOT NULL CHECK (price_cents >= 0),
            currency TEXT NOT NULL,
            active BOOLEAN NOT NULL DEFAULT TRUE
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::Database(format!("Failed to create product_packs: {}", e)))?;

    tx.commit()
        .await
        .map_err(|e| AppError::Transaction(format!("Failed to commit schema: {}", e)))?;

    info!("Ledger schema ready");

    Ok(())
}
