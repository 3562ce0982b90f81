//! Balance repository implementation
//!
//! PostgreSQL-backed storage for per-user token balances. Balances are created
//! lazily: `lock_for_update` upserts a zero row before taking the row lock so
//! the first credit or reserve for a user serializes like every later one.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tally_core::models::TokenBalance;
use tally_core::AppResult;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// PostgreSQL balance repository
#[derive(Clone)]
pub struct BalanceRepository {
    pool: PgPool,
}

const BALANCE_COLUMNS: &str = "user_id, available, reserved, version, created_at, updated_at";

impl BalanceRepository {
    /// Create a new balance repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a user's balance, if one exists yet
    #[instrument(skip(self))]
    pub async fn find_by_user(&self, user_id: Uuid) -> AppResult<Option<TokenBalance>> {
        debug!("Finding balance for user {}", user_id);

        let row = sqlx::query_as::<Postgres, BalanceRow>(&format!(
            "SELECT {BALANCE_COLUMNS} FROM token_balances WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding balance for {}: {}", user_id, e);
            crate::db_err("Failed to find balance", e)
        })?;

        Ok(row.map(Into::into))
    }

    /// Every user id with a balance row, for the reconciliation sweep
    #[instrument(skip(self))]
    pub async fn all_user_ids(&self) -> AppResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT user_id FROM token_balances ORDER BY user_id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error listing balance users: {}", e);
                crate::db_err("Failed to list balance users", e)
            })?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Ensure the balance row exists and lock it for the current transaction.
    ///
    /// All ledger mutations for a user serialize on this lock.
    pub async fn lock_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> AppResult<TokenBalance> {
        sqlx::query(
            r#"
            INSERT INTO token_balances (user_id, available, reserved, version)
            VALUES ($1, 0, 0, 0)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to ensure balance row for {}: {}", user_id, e);
            crate::db_err("Failed to ensure balance", e)
        })?;

        let row = sqlx::query_as::<Postgres, BalanceRow>(&format!(
            "SELECT {BALANCE_COLUMNS} FROM token_balances WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to lock balance for {}: {}", user_id, e);
            crate::db_err("Failed to lock balance", e)
        })?;

        Ok(row.into())
    }

    /// Apply a delta to a locked balance, bumping the version counter.
    ///
    /// Returns the balance after the mutation. The caller must hold the row
    /// lock (`lock_for_update`) in the same transaction.
    pub async fn apply_delta_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        available_delta: i64,
        reserved_delta: i64,
    ) -> AppResult<TokenBalance> {
        let row = sqlx::query_as::<Postgres, BalanceRow>(&format!(
            r#"
            UPDATE token_balances
            SET available = available + $2,
                reserved = reserved + $3,
                version = version + 1,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING {BALANCE_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(available_delta)
        .bind(reserved_delta)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to update balance for {}: {}", user_id, e);
            crate::db_err("Failed to update balance", e)
        })?;

        Ok(row.into())
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct BalanceRow {
    user_id: Uuid,
    available: i64,
    reserved: i64,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BalanceRow> for TokenBalance {
    fn from(row: BalanceRow) -> Self {
        Self {
            user_id: row.user_id,
            available: row.available,
            reserved: row.reserved,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
