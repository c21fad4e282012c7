//! Unified error handling for callmeter
//!
//! Every failure in the ledger maps onto [`AppError`]. The variants follow the
//! billing taxonomy: some are surfaced to the caller, some are retryable, and
//! duplicate deliveries are resolved internally before they ever reach a
//! response.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Ledger Errors ====================
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: i64, available: i64 },

    #[error("Duplicate session: {0}")]
    DuplicateSession(String),

    #[error("Unknown reservation for session: {0}")]
    UnknownReservation(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Balance of {org_id} would leave the representable range")]
    BalanceOverflow { org_id: String },

    #[error("Ledger integrity violation: {0}")]
    IntegrityViolation(String),

    // ==================== Storage Errors ====================
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Timed out waiting for lock on {key}")]
    ConcurrentMutationTimeout { key: String },

    #[error("Service overloaded: {0}")]
    Overloaded(String),

    // ==================== Cache Errors ====================
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cache connection failed: {0}")]
    CacheConnection(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Whether the whole guarded operation may be retried as-is.
    ///
    /// Storage failures and lock timeouts leave no partial state behind, so
    /// replaying the operation is safe. Insufficient funds is deliberately not
    /// retryable: without a top-up it fails identically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Persistence(_)
                | AppError::Pool(_)
                | AppError::ConcurrentMutationTimeout { .. }
                | AppError::Overloaded(_)
        )
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,

            // 422 Unprocessable Entity
            AppError::BalanceOverflow { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 402 Payment Required
            AppError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,

            // 404 Not Found
            AppError::WalletNotFound(_) | AppError::UnknownReservation(_) => {
                StatusCode::NOT_FOUND
            }

            // 409 Conflict
            AppError::DuplicateSession(_) => StatusCode::CONFLICT,

            // 503 Service Unavailable (retryable)
            AppError::Persistence(_)
            | AppError::Pool(_)
            | AppError::ConcurrentMutationTimeout { .. }
            | AppError::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InsufficientFunds { .. } => "insufficient_funds",
            AppError::DuplicateSession(_) => "duplicate_session",
            AppError::UnknownReservation(_) => "unknown_reservation",
            AppError::WalletNotFound(_) => "wallet_not_found",
            AppError::BalanceOverflow { .. } => "balance_overflow",
            AppError::IntegrityViolation(_) => "integrity_violation",
            AppError::Persistence(_) => "persistence_error",
            AppError::Pool(_) => "pool_error",
            AppError::ConcurrentMutationTimeout { .. } => "concurrent_mutation_timeout",
            AppError::Overloaded(_) => "overloaded",
            AppError::Cache(_) => "cache_error",
            AppError::CacheConnection(_) => "cache_connection_error",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
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
            "retryable": self.is_retryable(),
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
            AppError::InsufficientFunds {
                required: 280,
                available: 50
            }
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            AppError::WalletNotFound("org-1".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::ConcurrentMutationTimeout {
                key: "org:org-1".to_string()
            }
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::BalanceOverflow {
                org_id: "org-1".to_string()
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_retry_taxonomy() {
        assert!(AppError::Persistence("disk full".to_string()).is_retryable());
        assert!(AppError::ConcurrentMutationTimeout {
            key: "session:abc".to_string()
        }
        .is_retryable());
        assert!(!AppError::InsufficientFunds {
            required: 1,
            available: 0
        }
        .is_retryable());
        assert!(!AppError::UnknownReservation("abc".to_string()).is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::DuplicateSession("abc".to_string()).error_code(),
            "duplicate_session"
        );
        assert_eq!(
            AppError::InsufficientFunds {
                required: 1,
                available: 0
            }
            .error_code(),
            "insufficient_funds"
        );
    }
}
