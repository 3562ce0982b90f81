//! Reservation expiry sweep
//!
//! Fixed-interval background job that releases reservations past their TTL.
//! Each expiry goes through the normal release path under the key
//! `expire:{reservation_id}`, so a concurrent manual commit or release still
//! wins correctly.

use crate::ledger::LedgerService;
use crate::metrics::{MetricsSink, SharedMetrics};
use std::sync::Arc;
use std::time::Duration;
use tally_core::clock::SharedClock;
use tracing::warn;

/// Background sweeper for expired reservations
pub struct ExpirySweeper {
    ledger: Arc<LedgerService>,
    clock: SharedClock,
    metrics: SharedMetrics,
    batch: i64,
}

impl ExpirySweeper {
    /// Create a new sweeper
    pub fn new(
        ledger: Arc<LedgerService>,
        clock: SharedClock,
        metrics: SharedMetrics,
        batch: i64,
    ) -> Self {
        Self {
            ledger,
            clock,
            metrics,
            batch,
        }
    }

    /// Run one sweep pass; returns how many reservations expired
    pub async fn run_once(&self) -> tally_core::AppResult<u64> {
        let expired = self
            .ledger
            .expire_active_reservations(self.clock.now(), self.batch)
            .await?;
        MetricsSink::add(&self.metrics.reservations_expired, expired);
        Ok(expired)
    }

    /// Spawn the fixed-interval loop
    pub fn spawn(self: Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let interval = Duration::from_secs(interval_secs.max(1));
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = self.run_once().await {
                    warn!("expiry sweep failed: {}", e);
                }
            }
        })
    }
}
