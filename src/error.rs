use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid {param}: {reason}")]
    Validation { param: String, reason: String },

    #[error("Insufficient payer funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("External error: {0}")]
    ExternalError(String),

    #[error("Chain divergence: {0}")]
    ChainDivergence(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    /// Field-scoped validation failure.
    pub fn validation(param: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Validation {
            param: param.into(),
            reason: reason.into(),
        }
    }
}

/// Store errors raised outside of batch operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document {0} already exists")]
    Conflict(String),

    #[error("Document {0} not found")]
    NotFound(String),

    #[error("Write to {key} failed: {detail}")]
    Backend { key: String, detail: String },
}

/// Classification of a failed item within a batch store operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    Conflict,
    NotFound,
    Backend,
}

/// Outcome of a single failed item in a batch write.
///
/// Batch operations return one `Result<_, ItemError>` per input item, in
/// input order, so a failed write never fails the whole batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?} on {key}: {detail}")]
pub struct ItemError {
    pub key: String,
    pub kind: ItemErrorKind,
    pub detail: String,
}

impl ItemError {
    pub fn conflict(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            detail: format!("document {} already exists", key),
            key,
            kind: ItemErrorKind::Conflict,
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            detail: format!("document {} not found", key),
            key,
            kind: ItemErrorKind::NotFound,
        }
    }

    pub fn backend(key: impl Into<String>, detail: impl ToString) -> Self {
        Self {
            key: key.into(),
            kind: ItemErrorKind::Backend,
            detail: detail.to_string(),
        }
    }
}

impl From<ItemError> for StoreError {
    fn from(e: ItemError) -> Self {
        match e.kind {
            ItemErrorKind::Conflict => StoreError::Conflict(e.key),
            ItemErrorKind::NotFound => StoreError::NotFound(e.key),
            ItemErrorKind::Backend => StoreError::Backend {
                key: e.key,
                detail: e.detail,
            },
        }
    }
}

/// Per-item results of a batch store operation
pub type BatchResult<T> = Vec<Result<T, ItemError>>;

/// Count successes and failures of a batch result
pub fn tally<T>(results: &BatchResult<T>) -> (usize, usize) {
    let errors = results.iter().filter(|r| r.is_err()).count();
    (results.len() - errors, errors)
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Validation { param, reason } => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                reason.clone(),
                Some(serde_json::json!({ "param": param, "reason": reason })),
            ),
            AppError::BadRequest(reason) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                reason,
                None,
            ),
            AppError::InsufficientFunds { required, available } => (
                StatusCode::PAYMENT_REQUIRED,
                "INSUFFICIENT_PAYER_FUNDS",
                "insufficient payer funds".to_string(),
                Some(serde_json::json!({
                    "required": required,
                    "available": available,
                })),
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{} not found", what),
                None,
            ),
            AppError::Store(StoreError::NotFound(key)) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{} not found", key),
                None,
            ),
            AppError::ExternalError(_) => (
                StatusCode::BAD_GATEWAY,
                "UPSTREAM_ERROR",
                "An upstream service failed".to_string(),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalError(format!("HTTP request error: {:?}", error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
