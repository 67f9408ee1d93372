/// Error types for discussion-service
///
/// Validation errors surface immediately, storage errors propagate as-is, and
/// lock contention on votes is retried locally before it becomes
/// `TransientStorage`. Errors are converted to HTTP responses for API clients.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use thiserror::Error;

/// Result type for discussion-service operations
pub type Result<T> = std::result::Result<T, AppError>;

/// PostgreSQL SQLSTATE codes that indicate vote row contention
const LOCK_NOT_AVAILABLE: &str = "55P03";
const DEADLOCK_DETECTED: &str = "40P01";
const SERIALIZATION_FAILURE: &str = "40001";
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const QUERY_CANCELED: &str = "57014";

#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed cursor token, unknown tag or inconsistent payload
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Invalid vote value {0}: must be -1, 0 or 1")]
    InvalidVoteValue(i64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Lock wait timed out or the transaction lost a race; safe to retry
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Operation cancelled: deadline elapsed")]
    Cancelled,

    #[error("Community tree refresh failed: {0}")]
    CacheRefresh(String),
}

impl AppError {
    /// Map a `sqlx` error raised while holding a vote row lock. Contention
    /// becomes `ConcurrencyConflict`; everything else keeps the default mapping.
    pub fn from_vote_tx(err: sqlx::Error) -> Self {
        let code = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|c| c.into_owned());

        match code.as_deref() {
            Some(LOCK_NOT_AVAILABLE) | Some(DEADLOCK_DETECTED) | Some(SERIALIZATION_FAILURE)
            | Some(UNIQUE_VIOLATION) => AppError::ConcurrencyConflict(err.to_string()),
            Some(FOREIGN_KEY_VIOLATION) => AppError::NotFound("vote target".to_string()),
            _ => AppError::from(err),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::ConcurrencyConflict(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        let unavailable = matches!(
            err,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
        );
        let canceled = err
            .as_database_error()
            .and_then(|db| db.code())
            .map_or(false, |code| code == QUERY_CANCELED);

        if unavailable {
            AppError::StorageUnavailable(err.to_string())
        } else if canceled {
            AppError::Cancelled
        } else {
            AppError::Database(err)
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidCursor(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidArgument(err.to_string())
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidCursor(_)
            | AppError::InvalidVoteValue(_)
            | AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
            AppError::TransientStorage(_) | AppError::StorageUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            AppError::Database(_) | AppError::CacheRefresh(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // Raw database errors stay in the logs
        let message = match self {
            AppError::Database(_) => "Database error".to_string(),
            other => other.to_string(),
        };

        HttpResponse::build(status).json(serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        }))
    }
}
