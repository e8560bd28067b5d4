//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use subx_queue::QueueError;
use subx_storage::StorageError;
use subx_worker::WorkerError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Insufficient storage: {0}")]
    InsufficientStorage(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Db(#[from] subx_db::DbError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    pub fn insufficient_storage(msg: impl Into<String>) -> Self {
        Self::InsufficientStorage(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited | ApiError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InsufficientStorage(_) => StatusCode::INSUFFICIENT_STORAGE,
            ApiError::Storage(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            ApiError::Storage(StorageError::InvalidKey(_)) => StatusCode::BAD_REQUEST,
            ApiError::Queue(QueueError::Duplicate(_)) => StatusCode::CONFLICT,
            ApiError::Internal(_) | ApiError::Storage(_) | ApiError::Db(_) | ApiError::Queue(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> Option<&'static str> {
        match self {
            ApiError::QuotaExceeded(_) => Some("quota_exceeded"),
            ApiError::InsufficientStorage(_) => Some("insufficient_storage"),
            ApiError::RateLimited => Some("rate_limited"),
            ApiError::Queue(QueueError::Duplicate(_)) => Some("duplicate_job"),
            _ => None,
        }
    }

    fn is_internal(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl From<WorkerError> for ApiError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::NotFound(what) => ApiError::NotFound(what),
            WorkerError::Storage(e) => ApiError::Storage(e),
            WorkerError::Db(e) => ApiError::Db(e),
            WorkerError::Queue(e) => ApiError::Queue(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = if self.is_internal() {
            tracing::error!(error = %self, "Request failed");
            if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
                "An internal error occurred".to_string()
            } else {
                self.to_string()
            }
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            detail,
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::unauthorized("x").status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::quota_exceeded("x").status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::insufficient_storage("x").status_code(),
            StatusCode::INSUFFICIENT_STORAGE
        );
        assert_eq!(
            ApiError::from(StorageError::not_found("k")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(QueueError::Duplicate("translate:p:s".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(WorkerError::not_found("profile u1")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(WorkerError::Cancelled).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
