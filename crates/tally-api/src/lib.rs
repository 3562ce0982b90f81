//! Tally HTTP API layer
//!
//! Exposes the webhook ingestion endpoint plus thin read endpoints over the
//! ledger (balance, product packs, health). The internal ledger operations
//! (reserve/commit/release) are a programmatic API consumed by the job
//! subsystem, not HTTP.

pub mod dto;
pub mod handlers;

pub use handlers::{configure_balance, configure_packs, configure_webhooks};
