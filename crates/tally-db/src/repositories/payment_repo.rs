//! Payment repository implementation
//!
//! PostgreSQL-backed storage for payment records. The unique constraint on
//! `provider_session_id` is the second line of defense behind the processed
//! events marker against double-crediting a checkout.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tally_core::models::{Payment, PaymentStatus};
use tally_core::AppResult;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// PostgreSQL payment repository
#[derive(Clone)]
pub struct PaymentRepository {
    pool: PgPool,
}

const PAYMENT_COLUMNS: &str = "id, user_id, provider_session_id, provider_payment_intent_id, amount_cents, currency, credited_tokens, refunded_amount_cents, status, created_at, updated_at";

impl PaymentRepository {
    /// Create a new payment repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a payment by the provider checkout session id
    #[instrument(skip(self))]
    pub async fn find_by_session_id(&self, session_id: &str) -> AppResult<Option<Payment>> {
        debug!("Finding payment for session {}", session_id);

        let row = sqlx::query_as::<Postgres, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider_session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding payment by session: {}", e);
            crate::db_err("Failed to find payment", e)
        })?;

        Ok(row.map(Into::into))
    }

    /// Find a payment by the provider payment intent id
    #[instrument(skip(self))]
    pub async fn find_by_payment_intent(&self, payment_intent: &str) -> AppResult<Option<Payment>> {
        debug!("Finding payment for intent {}", payment_intent);

        let row = sqlx::query_as::<Postgres, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider_payment_intent_id = $1"
        ))
        .bind(payment_intent)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding payment by intent: {}", e);
            crate::db_err("Failed to find payment", e)
        })?;

        Ok(row.map(Into::into))
    }

    /// Insert a payment record.
    ///
    /// Surfaces unique-constraint violations unchanged so the webhook path
    /// can treat a raced duplicate session as already-handled.
    pub async fn insert_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payment: &Payment,
    ) -> Result<Payment, sqlx::Error> {
        let row = sqlx::query_as::<Postgres, PaymentRow>(&format!(
            r#"
            INSERT INTO payments (
                id, user_id, provider_session_id, provider_payment_intent_id,
                amount_cents, currency, credited_tokens, refunded_amount_cents, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.id)
        .bind(payment.user_id)
        .bind(&payment.provider_session_id)
        .bind(&payment.provider_payment_intent_id)
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(payment.credited_tokens)
        .bind(payment.refunded_amount_cents)
        .bind(payment.status.to_string())
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.into())
    }

    /// Accumulate a refund into the payment and recompute its status
    pub async fn apply_refund_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payment_id: Uuid,
        refund_amount_cents: i64,
    ) -> AppResult<Payment> {
        let row = sqlx::query_as::<Postgres, PaymentRow>(&format!(
            r#"
            UPDATE payments
            SET refunded_amount_cents = refunded_amount_cents + $2,
                status = CASE
                    WHEN refunded_amount_cents + $2 >= amount_cents THEN 'refunded'
                    WHEN refunded_amount_cents + $2 > 0 THEN 'partially_refunded'
                    ELSE status
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment_id)
        .bind(refund_amount_cents)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to apply refund to payment {}: {}", payment_id, e);
            crate::db_err("Failed to apply refund", e)
        })?;

        Ok(row.into())
    }

    /// Undo a refund's payment-side bookkeeping after a cancellation
    pub async fn revert_refund_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payment_id: Uuid,
        refund_amount_cents: i64,
    ) -> AppResult<Payment> {
        let row = sqlx::query_as::<Postgres, PaymentRow>(&format!(
            r#"
            UPDATE payments
            SET refunded_amount_cents = GREATEST(refunded_amount_cents - $2, 0),
                status = CASE
                    WHEN GREATEST(refunded_amount_cents - $2, 0) = 0 THEN 'succeeded'
                    WHEN GREATEST(refunded_amount_cents - $2, 0) >= amount_cents THEN 'refunded'
                    ELSE 'partially_refunded'
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment_id)
        .bind(refund_amount_cents)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to revert refund on payment {}: {}", payment_id, e);
            crate::db_err("Failed to revert refund", e)
        })?;

        Ok(row.into())
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    user_id: Uuid,
    provider_session_id: String,
    provider_payment_intent_id: Option<String>,
    amount_cents: i64,
    currency: String,
    credited_tokens: i64,
    refunded_amount_cents: i64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            provider_session_id: row.provider_session_id,
            provider_payment_intent_id: row.provider_payment_intent_id,
            amount_cents: row.amount_cents,
            currency: row.currency,
            credited_tokens: row.credited_tokens,
            refunded_amount_cents: row.refunded_amount_cents,
            status: PaymentStatus::parse(&row.status).unwrap_or(PaymentStatus::Pending),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
