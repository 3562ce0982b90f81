//! In-process metrics sink
//!
//! Plain atomic counters plus a webhook latency accumulator. Recording is
//! infallible, so a metrics problem can never break payment processing. The
//! snapshot feeds the health endpoint.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counter and timer sink
#[derive(Debug, Default)]
pub struct MetricsSink {
    pub webhook_ok: AtomicU64,
    pub webhook_duplicate: AtomicU64,
    pub webhook_ignored: AtomicU64,
    pub webhook_bad_signature: AtomicU64,
    pub webhook_rejected: AtomicU64,
    pub webhook_failed: AtomicU64,

    pub tokens_credited: AtomicU64,
    pub tokens_deducted: AtomicU64,
    pub reservations_expired: AtomicU64,
    pub reconciliation_runs: AtomicU64,
    pub reconciliation_mismatches: AtomicU64,

    webhook_duration_micros: AtomicU64,
    webhook_duration_count: AtomicU64,
}

impl MetricsSink {
    /// Create a new sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump a counter
    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add to a counter
    #[inline]
    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    /// Record one webhook processing duration
    pub fn observe_webhook_duration(&self, elapsed: Duration) {
        self.webhook_duration_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.webhook_duration_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time view for the health endpoint
    pub fn snapshot(&self) -> MetricsSnapshot {
        let count = self.webhook_duration_count.load(Ordering::Relaxed);
        let micros = self.webhook_duration_micros.load(Ordering::Relaxed);
        MetricsSnapshot {
            webhook_ok: self.webhook_ok.load(Ordering::Relaxed),
            webhook_duplicate: self.webhook_duplicate.load(Ordering::Relaxed),
            webhook_ignored: self.webhook_ignored.load(Ordering::Relaxed),
            webhook_bad_signature: self.webhook_bad_signature.load(Ordering::Relaxed),
            webhook_rejected: self.webhook_rejected.load(Ordering::Relaxed),
            webhook_failed: self.webhook_failed.load(Ordering::Relaxed),
            tokens_credited: self.tokens_credited.load(Ordering::Relaxed),
            tokens_deducted: self.tokens_deducted.load(Ordering::Relaxed),
            reservations_expired: self.reservations_expired.load(Ordering::Relaxed),
            reconciliation_runs: self.reconciliation_runs.load(Ordering::Relaxed),
            reconciliation_mismatches: self.reconciliation_mismatches.load(Ordering::Relaxed),
            webhook_avg_micros: if count > 0 { micros / count } else { 0 },
        }
    }
}

/// Serializable metrics view
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub webhook_ok: u64,
    pub webhook_duplicate: u64,
    pub webhook_ignored: u64,
    pub webhook_bad_signature: u64,
    pub webhook_rejected: u64,
    pub webhook_failed: u64,
    pub tokens_credited: u64,
    pub tokens_deducted: u64,
    pub reservations_expired: u64,
    pub reconciliation_runs: u64,
    pub reconciliation_mismatches: u64,
    pub webhook_avg_micros: u64,
}

/// Shared sink handle
pub type SharedMetrics = Arc<MetricsSink>;
