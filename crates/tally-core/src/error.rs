//! Unified error handling for the Tally token ledger
//!
//! This module provides a comprehensive error type that covers all possible
//! failure scenarios in the application, with automatic HTTP response mapping.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// All errors in the application should be converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Ledger Errors ====================
    #[error("Insufficient tokens: requested {requested}, available {available} (short {shortfall})")]
    InsufficientTokens {
        available: i64,
        requested: i64,
        shortfall: i64,
    },

    #[error("Commit exceeds reserved amount for reservation {reservation_id}: estimated {estimated}, actual {actual}")]
    CommitExceedsReserved {
        reservation_id: String,
        estimated: i64,
        actual: i64,
    },

    #[error("Reservation not active: {0}")]
    ReservationNotActive(String),

    #[error("Idempotency conflict: key {0} already spent on a different operation")]
    IdempotencyConflict(String),

    // ==================== Webhook Errors ====================
    #[error("Invalid checkout session: {0}")]
    InvalidCheckoutSession(String),

    #[error("Bad webhook signature: {0}")]
    BadSignature(String),

    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // ==================== External Service Errors ====================
    #[error("Payment provider error: {0}")]
    Provider(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_)
            | AppError::InvalidInput(_)
            | AppError::CommitExceedsReserved { .. }
            | AppError::InvalidCheckoutSession(_)
            | AppError::BadSignature(_) => StatusCode::BAD_REQUEST,

            // 402 Payment Required
            AppError::InsufficientTokens { .. } => StatusCode::PAYMENT_REQUIRED,

            // 404 Not Found
            AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::ReservationNotActive(_)
            | AppError::IdempotencyConflict(_)
            | AppError::Conflict(_) => StatusCode::CONFLICT,

            // 502 Bad Gateway
            AppError::Provider(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable (retryable)
            AppError::TransientStorage(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InsufficientTokens { .. } => "insufficient_tokens",
            AppError::CommitExceedsReserved { .. } => "commit_exceeds_reserved",
            AppError::ReservationNotActive(_) => "reservation_not_active",
            AppError::IdempotencyConflict(_) => "idempotency_conflict",
            AppError::InvalidCheckoutSession(_) => "invalid_checkout_session",
            AppError::BadSignature(_) => "bad_signature",
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::TransientStorage(_) => "transient_storage_error",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Provider(_) => "provider_error",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether the caller should retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::TransientStorage(_)
                | AppError::Pool(_)
                | AppError::Transaction(_)
                | AppError::Database(_)
                | AppError::Provider(_)
        )
    }

    /// Build the InsufficientTokens variant from a balance check
    pub fn insufficient_tokens(available: i64, requested: i64) -> Self {
        AppError::InsufficientTokens {
            available,
            requested,
            shortfall: requested - available,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::insufficient_tokens(400, 1000).status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            AppError::ReservationNotActive("r1".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::BadSignature("mismatch".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::TransientStorage("timeout".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::IdempotencyConflict("k".to_string()).error_code(),
            "idempotency_conflict"
        );
        assert_eq!(
            AppError::CommitExceedsReserved {
                reservation_id: "r1".to_string(),
                estimated: 1000,
                actual: 1500,
            }
            .error_code(),
            "commit_exceeds_reserved"
        );
    }

    #[test]
    fn test_insufficient_tokens_shortfall() {
        let err = AppError::insufficient_tokens(400, 1000);
        match err {
            AppError::InsufficientTokens {
                available,
                requested,
                shortfall,
            } => {
                assert_eq!(available, 400);
                assert_eq!(requested, 1000);
                assert_eq!(shortfall, 600);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::TransientStorage("t".into()).is_retryable());
        assert!(!AppError::insufficient_tokens(0, 1).is_retryable());
        assert!(!AppError::IdempotencyConflict("k".into()).is_retryable());
    }
}
