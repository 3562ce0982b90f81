//! Reconciliation job
//!
//! Periodic consistency check between the journal and the stored balances.
//! For each user: `expected_available = Σ PURCHASE + Σ ADJUSTMENT − Σ COMMIT
//! − Σ |REFUND| − Σ (active reservations' estimated)`. Refund magnitudes are
//! summed because historical rows may carry either sign. Mismatches are
//! reported, never healed.

use crate::metrics::{MetricsSink, SharedMetrics};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tally_core::AppResult;
use tally_db::{BalanceRepository, ReservationRepository, TransactionRepository};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// One detected inconsistency
#[derive(Debug, Clone, Serialize)]
pub struct BalanceMismatch {
    pub user_id: Uuid,
    pub expected_available: i64,
    pub stored_available: i64,
    pub drift: i64,
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    pub users_checked: u64,
    pub mismatches: Vec<BalanceMismatch>,
}

/// Journal-vs-balance reconciler
pub struct ReconciliationJob {
    balances: BalanceRepository,
    reservations: ReservationRepository,
    journal: TransactionRepository,
    metrics: SharedMetrics,
}

impl ReconciliationJob {
    /// Create a new reconciliation job
    pub fn new(pool: PgPool, metrics: SharedMetrics) -> Self {
        Self {
            balances: BalanceRepository::new(pool.clone()),
            reservations: ReservationRepository::new(pool.clone()),
            journal: TransactionRepository::new(pool),
            metrics,
        }
    }

    /// Check one user; `None` means the books balance
    #[instrument(skip(self))]
    pub async fn check_user(&self, user_id: Uuid) -> AppResult<Option<BalanceMismatch>> {
        let Some(balance) = self.balances.find_by_user(user_id).await? else {
            return Ok(None);
        };

        let totals = self.journal.journal_totals(user_id).await?;
        let held = self.reservations.active_held_tokens(user_id).await?;

        let expected_available = totals.net_credited() - held;

        if expected_available == balance.available {
            return Ok(None);
        }

        let mismatch = BalanceMismatch {
            user_id,
            expected_available,
            stored_available: balance.available,
            drift: balance.available - expected_available,
        };

        warn!(
            user = %user_id,
            expected = expected_available,
            stored = balance.available,
            drift = mismatch.drift,
            "balance does not reconcile against journal"
        );

        Ok(Some(mismatch))
    }

    /// Run one full pass over every user with a balance row
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> AppResult<ReconciliationReport> {
        let mut report = ReconciliationReport::default();

        for user_id in self.balances.all_user_ids().await? {
            report.users_checked += 1;
            if let Some(mismatch) = self.check_user(user_id).await? {
                MetricsSink::incr(&self.metrics.reconciliation_mismatches);
                report.mismatches.push(mismatch);
            }
        }

        MetricsSink::incr(&self.metrics.reconciliation_runs);
        info!(
            users = report.users_checked,
            mismatches = report.mismatches.len(),
            "reconciliation pass complete"
        );

        Ok(report)
    }

    /// Spawn the fixed-interval loop
    pub fn spawn(self: Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let interval = Duration::from_secs(interval_secs.max(1));
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = self.run_once().await {
                    warn!("reconciliation pass failed: {}", e);
                }
            }
        })
    }
}
