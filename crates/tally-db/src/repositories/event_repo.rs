//! Processed event repository implementation
//!
//! The marker table behind exactly-once webhook handling. The marker insert
//! happens in the same transaction as the ledger effect it guards, so a
//! duplicate delivery either sees the marker up front or loses the
//! `ON CONFLICT` race and rolls its transaction back.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tally_core::models::ProcessedEvent;
use tally_core::AppResult;
use tracing::{debug, error, instrument};

/// PostgreSQL processed-event repository
#[derive(Clone)]
pub struct ProcessedEventRepository {
    pool: PgPool,
}

impl ProcessedEventRepository {
    /// Create a new processed-event repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fast-path dedup lookup before any handler work
    #[instrument(skip(self))]
    pub async fn find(&self, event_id: &str) -> AppResult<Option<ProcessedEvent>> {
        debug!("Checking processed marker for event {}", event_id);

        let row: Option<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT event_id, received_at FROM processed_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    error!("Database error checking processed event: {}", e);
                    crate::db_err("Failed to check processed event", e)
                })?;

        Ok(row.map(|(event_id, received_at)| ProcessedEvent::new(event_id, received_at)))
    }

    /// Insert the marker; returns false when another worker already holds it.
    ///
    /// Must run in the same transaction as the ledger effect.
    pub async fn mark_processed_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_id: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id)
            VALUES ($1)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to mark event {} processed: {}", event_id, e);
            crate::db_err("Failed to mark event processed", e)
        })?;

        Ok(result.rows_affected() > 0)
    }
}
