//! Business logic services for the Tally token ledger
//!
//! This crate contains the services that orchestrate the billing operations:
//! the transactional ledger, refund policy, webhook event processing,
//! checkout validation, catalog sync, and the background jobs.
//!
//! # Architecture
//!
//! Services are designed to be composable and testable:
//! - Each service owns its dependencies (repositories, provider client, clock)
//! - Services are wrapped in Arc for safe sharing across async tasks
//! - All operations are instrumented with tracing
//! - Errors surface as `AppError` kinds; the webhook processor maps them to
//!   its outcome enum at the boundary
//!
//! # Services
//!
//! - `LedgerService` - atomic reserve/commit/release/credit/deduct
//! - `refund_policy` - pure refund clawback calculation
//! - `WebhookProcessor` - verified, deduplicated provider event handling
//! - `CheckoutValidator` - session-vs-catalog consistency checks
//! - `ProductCatalog` - pack lookup with config fallback and provider sync
//! - `ExpirySweeper` - reservation TTL enforcement
//! - `ReconciliationJob` - journal-vs-balance consistency reporting
//! - `MetricsSink` - in-process counters that never break processing

pub mod catalog;
pub mod checkout;
pub mod expiry;
pub mod idempotency;
pub mod ledger;
pub mod metrics;
pub mod provider;
pub mod reconciliation;
pub mod refund_policy;
pub mod signature;
pub mod webhook;

pub use catalog::ProductCatalog;
pub use checkout::{CheckoutValidator, ValidatedCheckout};
pub use expiry::ExpirySweeper;
pub use ledger::{
    CommitOutcome, CreditOutcome, DeductOutcome, LedgerService, ReleaseOutcome, ReserveOutcome,
};
pub use metrics::{MetricsSink, MetricsSnapshot};
pub use provider::{HttpProviderClient, ProviderClient};
pub use reconciliation::{ReconciliationJob, ReconciliationReport};
pub use refund_policy::RefundCalculation;
pub use webhook::{WebhookOutcome, WebhookProcessor};
