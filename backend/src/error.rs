//! Error handling for the stock ledger
//!
//! Business rejections are typed so calling workflows can translate them into
//! user-facing messages. Only `Busy` is worth retrying.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Ledger errors
    #[error("Insufficient stock: available {available}, requested {requested}")]
    InsufficientStock {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Quantity mismatch: {0}")]
    QuantityMismatch(String),

    #[error("Duplicate posting: {0}")]
    DuplicatePosting(String),

    #[error("Resource busy: {0}")]
    Busy(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        AppError::NotFound(resource.into())
    }

    /// Lock waits and serialization failures; the caller may try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Busy(_))
    }

    /// Business rejections logged at warn instead of error
    fn is_business_rule(&self) -> bool {
        matches!(
            self,
            AppError::InsufficientStock { .. }
                | AppError::InvalidTransition(_)
                | AppError::QuantityMismatch(_)
                | AppError::DuplicatePosting(_)
                | AppError::NotFound(_)
                | AppError::Validation { .. }
        )
    }
}

/// Postgres SQLSTATEs that mean "try again later" rather than "broken"
const RETRYABLE_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available (lock_timeout)
    "57014", // query_canceled (statement_timeout)
    "23505", // unique_violation: racing insert of the same keyed row
];

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        let retryable = match &err {
            sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Database(db_err) => db_err
                .code()
                .map_or(false, |code| RETRYABLE_SQLSTATES.contains(&code.as_ref())),
            _ => false,
        };
        if retryable {
            return AppError::Busy(err.to_string());
        }

        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Row".to_string()),
            other => AppError::DatabaseError(other),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "request".to_string());
        AppError::Validation {
            field,
            message: errors.to_string(),
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<Decimal>,
}

impl ErrorDetail {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            field: None,
            available: None,
            requested: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match &self {
            AppError::InsufficientStock {
                available,
                requested,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail {
                    available: Some(*available),
                    requested: Some(*requested),
                    ..ErrorDetail::new("INSUFFICIENT_STOCK", self.to_string())
                },
            ),
            AppError::InvalidTransition(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail::new("INVALID_TRANSITION", msg.clone()),
            ),
            AppError::QuantityMismatch(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail::new("QUANTITY_MISMATCH", msg.clone()),
            ),
            AppError::DuplicatePosting(msg) => (
                StatusCode::CONFLICT,
                ErrorDetail::new("DUPLICATE_POSTING", msg.clone()),
            ),
            AppError::Busy(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorDetail::new("BUSY", "The stock record is busy, please retry"),
            ),
            AppError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", format!("{} not found", resource)),
            ),
            AppError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                ErrorDetail {
                    field: Some(field.clone()),
                    ..ErrorDetail::new("VALIDATION_ERROR", message.clone())
                },
            ),
            AppError::Configuration(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("CONFIGURATION_ERROR", format!("Configuration error: {}", msg)),
            ),
            AppError::DatabaseError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("DATABASE_ERROR", "A database error occurred"),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", msg.clone()),
            ),
        };

        if self.is_business_rule() {
            tracing::warn!("Rejected: {}", self);
        } else {
            tracing::error!("Error: {:?}", self);
        }

        let body = Json(ErrorResponse {
            error: error_detail,
        });
        if self.is_retryable() {
            (status, [(header::RETRY_AFTER, "1")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

/// Result type alias for services and handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_busy_is_retryable() {
        assert!(AppError::Busy("lock timeout".into()).is_retryable());
        assert!(!AppError::InsufficientStock {
            available: Decimal::from(4),
            requested: Decimal::from(6),
        }
        .is_retryable());
        assert!(!AppError::DuplicatePosting("receipt".into()).is_retryable());
    }

    #[test]
    fn test_pool_timeout_maps_to_busy() {
        let err: AppError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, AppError::Busy(_)));
    }

    #[test]
    fn test_status_codes() {
        let response = AppError::InsufficientStock {
            available: Decimal::from(4),
            requested: Decimal::from(6),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = AppError::Busy("timeout".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key(header::RETRY_AFTER));

        let response = AppError::DuplicatePosting("sale".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
