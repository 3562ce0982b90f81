//! Tally Database Layer
//!
//! This crate provides PostgreSQL access and repository implementations for
//! the token ledger. It includes:
//!
//! - Connection pool management with sqlx
//! - Idempotent schema bootstrap
//! - Repository implementations for balances, reservations, the transaction
//!   journal, payments, processed events, and product packs
//! - Transaction-parameterized write paths so callers can compose several
//!   effects atomically

pub mod pool;
pub mod repositories;
pub mod schema;

pub use pool::create_pool;
pub use repositories::*;
pub use schema::init_schema;

// Re-export commonly used types
pub use sqlx::{PgPool, Postgres, Transaction};
pub use tally_core::{AppError, AppResult};

/// Classify a sqlx error, keeping unique-violations distinguishable
pub(crate) fn db_err(context: &str, e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            AppError::TransientStorage(format!("{context}: {e}"))
        }
        sqlx::Error::Io(_) => AppError::TransientStorage(format!("{context}: {e}")),
        _ => AppError::Database(format!("{context}: {e}")),
    }
}

/// Whether the error is a unique-constraint violation (idempotency races)
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}
