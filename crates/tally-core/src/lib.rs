//! Tally Core Library
//!
//! This crate provides the foundational types, configuration, and error
//! handling for the Tally token-billing ledger. It includes:
//!
//! - Domain models (TokenBalance, TokenReservation, TokenTransaction, ...)
//! - Unified error handling with HTTP response mapping
//! - Application configuration
//! - The injectable clock seam used by reservation TTL logic

pub mod clock;
pub mod config;
pub mod error;
pub mod models;

pub use clock::{Clock, SystemClock};
pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
