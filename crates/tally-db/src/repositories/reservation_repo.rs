//! Reservation repository implementation
//!
//! PostgreSQL-backed storage for token reservations with the queries the
//! ledger service and the expiry sweep need: insert, lock, finalize, and the
//! expired-active scan.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tally_core::models::{ReservationState, TokenReservation};
use tally_core::AppResult;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// PostgreSQL reservation repository
#[derive(Clone)]
pub struct ReservationRepository {
    pool: PgPool,
}

const RESERVATION_COLUMNS: &str = "id, user_id, estimated_tokens, committed_tokens, state, job_ref, expires_at, created_at, updated_at";

impl ReservationRepository {
    /// Create a new reservation repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a reservation by id
    #[instrument(skip(self))]
    pub async fn find_by_id(&self, id: Uuid) -> AppResult<Option<TokenReservation>> {
        debug!("Finding reservation {}", id);

        let row = sqlx::query_as::<Postgres, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM token_reservations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding reservation {}: {}", id, e);
            crate::db_err("Failed to find reservation", e)
        })?;

        Ok(row.map(Into::into))
    }

    /// Insert a freshly created reservation
    pub async fn insert_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        reservation: &TokenReservation,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO token_reservations (
                id, user_id, estimated_tokens, committed_tokens,
                state, job_ref, expires_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.user_id)
        .bind(reservation.estimated_tokens)
        .bind(reservation.committed_tokens)
        .bind(reservation.state.to_string())
        .bind(&reservation.job_ref)
        .bind(reservation.expires_at)
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to insert reservation {}: {}", reservation.id, e);
            crate::db_err("Failed to insert reservation", e)
        })?;

        Ok(())
    }

    /// Lock a reservation row for the current transaction
    pub async fn lock_by_id_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> AppResult<Option<TokenReservation>> {
        let row = sqlx::query_as::<Postgres, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM token_reservations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to lock reservation {}: {}", id, e);
            crate::db_err("Failed to lock reservation", e)
        })?;

        Ok(row.map(Into::into))
    }

    /// Move a locked reservation into a terminal state
    pub async fn finalize_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        state: ReservationState,
        committed_tokens: i64,
    ) -> AppResult<TokenReservation> {
        let row = sqlx::query_as::<Postgres, ReservationRow>(&format!(
            r#"
            UPDATE token_reservations
            SET state = $2,
                committed_tokens = $3,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(state.to_string())
        .bind(committed_tokens)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to finalize reservation {}: {}", id, e);
            crate::db_err("Failed to finalize reservation", e)
        })?;

        Ok(row.into())
    }

    /// Ids of ACTIVE reservations whose TTL elapsed before `now`
    #[instrument(skip(self))]
    pub async fn expired_active_ids(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM token_reservations
            WHERE state = 'active' AND expires_at < $1
            ORDER BY expires_at
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error scanning expired reservations: {}", e);
            crate::db_err("Failed to scan expired reservations", e)
        })?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Sum of estimated tokens currently held by a user's active reservations
    pub async fn active_held_tokens(&self, user_id: Uuid) -> AppResult<i64> {
        let row: (Option<i64>,) = sqlx::query_as(
            r#"
            SELECT SUM(estimated_tokens)::BIGINT
            FROM token_reservations
            WHERE user_id = $1 AND state = 'active'
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error summing held tokens for {}: {}", user_id, e);
            crate::db_err("Failed to sum held tokens", e)
        })?;

        Ok(row.0.unwrap_or(0))
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    user_id: Uuid,
    estimated_tokens: i64,
    committed_tokens: i64,
    state: String,
    job_ref: Option<String>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ReservationRow> for TokenReservation {
    fn from(row: ReservationRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            estimated_tokens: row.estimated_tokens,
            committed_tokens: row.committed_tokens,
            state: ReservationState::parse(&row.state).unwrap_or(ReservationState::Active),
            job_ref: row.job_ref,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
