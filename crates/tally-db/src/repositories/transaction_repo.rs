//! Transaction journal repository implementation
//!
//! Append-only access to the token journal. Inserts happen only inside the
//! ledger's transactions; reads serve the idempotency probes, the refund
//! policy, and the reconciliation job.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tally_core::models::{TokenTransaction, TransactionType};
use tally_core::AppResult;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// PostgreSQL journal repository
#[derive(Clone)]
pub struct TransactionRepository {
    pool: PgPool,
}

const TX_COLUMNS: &str = "id, user_id, tx_type, source, amount_tokens, ref_id, idempotency_key, balance_after_available, balance_after_reserved, meta, created_at";

/// Per-type journal sums for one user, refund magnitudes folded positive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalTotals {
    pub purchased: i64,
    pub adjusted: i64,
    pub committed: i64,
    pub refunded: i64,
}

impl JournalTotals {
    /// Expected available balance before subtracting active holds
    pub fn net_credited(&self) -> i64 {
        self.purchased + self.adjusted - self.committed - self.refunded
    }
}

impl TransactionRepository {
    /// Create a new journal repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Pool-level idempotency probe
    #[instrument(skip(self))]
    pub async fn find_by_key(&self, idempotency_key: &str) -> AppResult<Option<TokenTransaction>> {
        debug!("Probing journal for idempotency key");

        let row = sqlx::query_as::<Postgres, TransactionRow>(&format!(
            "SELECT {TX_COLUMNS} FROM token_transactions WHERE idempotency_key = $1"
        ))
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error probing idempotency key: {}", e);
            crate::db_err("Failed to probe idempotency key", e)
        })?;

        Ok(row.map(Into::into))
    }

    /// In-transaction re-probe, used after the balance lock is held
    pub async fn find_by_key_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        idempotency_key: &str,
    ) -> AppResult<Option<TokenTransaction>> {
        let row = sqlx::query_as::<Postgres, TransactionRow>(&format!(
            "SELECT {TX_COLUMNS} FROM token_transactions WHERE idempotency_key = $1"
        ))
        .bind(idempotency_key)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| {
            error!("Database error re-probing idempotency key: {}", e);
            crate::db_err("Failed to re-probe idempotency key", e)
        })?;

        Ok(row.map(Into::into))
    }

    /// Append a journal row.
    ///
    /// Surfaces unique-constraint violations unchanged so the ledger's retry
    /// loop can distinguish an idempotency race from a real failure.
    pub async fn insert_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &NewTransaction<'_>,
    ) -> Result<TokenTransaction, sqlx::Error> {
        let row = sqlx::query_as::<Postgres, TransactionRow>(&format!(
            r#"
            INSERT INTO token_transactions (
                user_id, tx_type, source, amount_tokens, ref_id,
                idempotency_key, balance_after_available, balance_after_reserved, meta
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {TX_COLUMNS}
            "#
        ))
        .bind(entry.user_id)
        .bind(entry.tx_type.to_string())
        .bind(entry.source)
        .bind(entry.amount_tokens)
        .bind(entry.ref_id)
        .bind(entry.idempotency_key)
        .bind(entry.balance_after_available)
        .bind(entry.balance_after_reserved)
        .bind(&entry.meta)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.into())
    }

    /// Per-type sums for the reconciliation job. Refund rows may carry either
    /// sign historically, so their magnitude is summed.
    #[instrument(skip(self))]
    pub async fn journal_totals(&self, user_id: Uuid) -> AppResult<JournalTotals> {
        let rows: Vec<(String, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT tx_type,
                   SUM(CASE WHEN tx_type = 'REFUND' THEN ABS(amount_tokens) ELSE amount_tokens END)::BIGINT
            FROM token_transactions
            WHERE user_id = $1
            GROUP BY tx_type
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error summing journal for {}: {}", user_id, e);
            crate::db_err("Failed to sum journal", e)
        })?;

        let mut totals = JournalTotals::default();
        for (tx_type, sum) in rows {
            let sum = sum.unwrap_or(0);
            match TransactionType::parse(&tx_type) {
                Some(TransactionType::Purchase) => totals.purchased = sum,
                Some(TransactionType::Adjustment) => totals.adjusted = sum,
                Some(TransactionType::Commit) => totals.committed = sum,
                Some(TransactionType::Refund) => totals.refunded = sum,
                _ => {}
            }
        }

        Ok(totals)
    }

    /// Tokens committed by a user since `instant`, the refund policy's
    /// "spent since the payment" input
    #[instrument(skip(self))]
    pub async fn committed_tokens_since(
        &self,
        user_id: Uuid,
        instant: DateTime<Utc>,
    ) -> AppResult<i64> {
        let row: (Option<i64>,) = sqlx::query_as(
            r#"
            SELECT SUM(amount_tokens)::BIGINT
            FROM token_transactions
            WHERE user_id = $1 AND tx_type = 'COMMIT' AND created_at >= $2
            "#,
        )
        .bind(user_id)
        .bind(instant)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error summing commits for {}: {}", user_id, e);
            crate::db_err("Failed to sum commits", e)
        })?;

        Ok(row.0.unwrap_or(0))
    }
}

/// Insert payload for a journal row
#[derive(Debug)]
pub struct NewTransaction<'a> {
    pub user_id: Uuid,
    pub tx_type: TransactionType,
    pub source: &'a str,
    pub amount_tokens: i64,
    pub ref_id: Option<&'a str>,
    pub idempotency_key: &'a str,
    pub balance_after_available: i64,
    pub balance_after_reserved: i64,
    pub meta: Option<serde_json::Value>,
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: i64,
    user_id: Uuid,
    tx_type: String,
    source: String,
    amount_tokens: i64,
    ref_id: Option<String>,
    idempotency_key: String,
    balance_after_available: i64,
    balance_after_reserved: i64,
    meta: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl From<TransactionRow> for TokenTransaction {
    fn from(row: TransactionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            // Journal rows are written by this crate, so the type string is
            // always one of ours; fall back to ADJUSTMENT rather than panic.
            tx_type: TransactionType::parse(&row.tx_type).unwrap_or(TransactionType::Adjustment),
            source: row.source,
            amount_tokens: row.amount_tokens,
            ref_id: row.ref_id,
            idempotency_key: row.idempotency_key,
            balance_after_available: row.balance_after_available,
            balance_after_reserved: row.balance_after_reserved,
            meta: row.meta,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_totals_net() {
        let totals = JournalTotals {
            purchased: 1000,
            adjusted: 200,
            committed: 300,
            refunded: 150,
        };
        assert_eq!(totals.net_credited(), 750);
    }
}
