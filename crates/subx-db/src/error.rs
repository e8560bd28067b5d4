//! Database error types.

use thiserror::Error;

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur talking to PostgREST.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Row already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited, retry after {0}ms")]
    RateLimited(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DbError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    /// Map an HTTP error status to an error.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::AuthError(message),
            403 => Self::PermissionDenied(message),
            404 => Self::NotFound(message),
            409 => Self::AlreadyExists(message),
            429 => Self::RateLimited(1000),
            500..=599 => Self::ServerError(status, message),
            _ => Self::RequestFailed(message),
        }
    }

    /// HTTP status this error corresponds to, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            DbError::AuthError(_) => Some(401),
            DbError::PermissionDenied(_) => Some(403),
            DbError::NotFound(_) => Some(404),
            DbError::AlreadyExists(_) => Some(409),
            DbError::RateLimited(_) => Some(429),
            DbError::ServerError(status, _) => Some(*status),
            DbError::RequestFailed(_) => Some(400),
            DbError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Network errors, 429 and 5xx are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DbError::Network(_) | DbError::RateLimited(_) | DbError::ServerError(_, _)
        )
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            DbError::RateLimited(ms) => Some(*ms),
            _ => None,
        }
    }
}
