//! Unified error handling for the billing engine
//!
//! Every failure is one of three families: something was not found, a
//! business rule rejected the request, or the storage layer failed. The
//! families stay distinguishable all the way to the HTTP response.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Coarse classification of an [`AppError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Tenant, call, or balance row absent
    NotFound,
    /// Expected, user-facing rejection (e.g. insufficient balance)
    BusinessRejection,
    /// Malformed request input
    Validation,
    /// Store unavailable or a transaction failed
    StorageFault,
    /// Everything else
    Internal,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Not Found ====================
    #[error("Tenant not found: {0}")]
    TenantNotFound(i32),

    #[error("Call {call_id} not found for tenant {tenant_id}")]
    CallNotFound { tenant_id: i32, call_id: i64 },

    #[error("Balance not found for tenant {0}")]
    BalanceNotFound(i32),

    // ==================== Business Rejections ====================
    #[error("Insufficient balance: tenant {tenant_id} has {current_cents} cents")]
    InsufficientBalance { tenant_id: i32, current_cents: i64 },

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    // ==================== Storage Faults ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Internal Errors ====================
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the error family
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::TenantNotFound(_)
            | AppError::CallNotFound { .. }
            | AppError::BalanceNotFound(_) => ErrorKind::NotFound,

            AppError::InsufficientBalance { .. } => ErrorKind::BusinessRejection,

            AppError::Validation(_) => ErrorKind::Validation,

            AppError::Database(_) | AppError::Pool(_) | AppError::Transaction(_) => {
                ErrorKind::StorageFault
            }

            AppError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::BusinessRejection => StatusCode::PAYMENT_REQUIRED,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::StorageFault | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::TenantNotFound(_) => "tenant_not_found",
            AppError::CallNotFound { .. } => "call_not_found",
            AppError::BalanceNotFound(_) => "balance_not_found",
            AppError::InsufficientBalance { .. } => "insufficient_balance",
            AppError::Validation(_) => "validation_error",
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Public message. Storage faults are reported generically.
    fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::StorageFault | ErrorKind::Internal => "Internal server error".to_string(),
            _ => self.to_string(),
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
            "message": self.public_message(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
