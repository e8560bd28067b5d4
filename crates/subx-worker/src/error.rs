//! Worker error types.

use thiserror::Error;

use subx_storage::StorageError;
use subx_translate::TranslateError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Db(#[from] subx_db::DbError),

    #[error("Media error: {0}")]
    Media(#[from] subx_media::MediaError),

    #[error("Translation error: {0}")]
    Translate(#[from] TranslateError),

    #[error("Subtitle error: {0}")]
    Subtitle(#[from] subx_subtitles::SubtitleError),

    #[error("Queue error: {0}")]
    Queue(#[from] subx_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Transient failures that may succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Storage(e) => !matches!(
                e,
                StorageError::NotFound(_) | StorageError::InvalidKey(_) | StorageError::ConfigError(_)
            ),
            WorkerError::Db(e) => e.is_retryable(),
            WorkerError::Translate(e) => e.is_retryable(),
            WorkerError::Queue(_) | WorkerError::Io(_) => true,
            _ => false,
        }
    }

    /// Failures that no retry can fix, such as a rejected API key.
    pub fn is_permanent(&self) -> bool {
        match self {
            WorkerError::Translate(e) => e.is_permanent(),
            WorkerError::NotFound(_) | WorkerError::ConfigError(_) => true,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            WorkerError::Cancelled
                | WorkerError::Translate(TranslateError::Cancelled)
                | WorkerError::Media(subx_media::MediaError::Cancelled)
        )
    }

    /// Message stored on the job row; ffmpeg failures include their stderr tail.
    pub fn user_message(&self) -> String {
        match self {
            WorkerError::Media(e) => e.summary(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let rate_limited = WorkerError::Translate(TranslateError::api("openai", 429, "slow down"));
        assert!(rate_limited.is_retryable());
        assert!(!rate_limited.is_permanent());

        let bad_key = WorkerError::Translate(TranslateError::api("deepl", 403, "forbidden"));
        assert!(!bad_key.is_retryable());
        assert!(bad_key.is_permanent());

        assert!(WorkerError::Storage(StorageError::upload_failed("reset")).is_retryable());
        assert!(!WorkerError::Storage(StorageError::not_found("k")).is_retryable());
        assert!(WorkerError::Db(subx_db::DbError::ServerError(502, "bad gateway".into())).is_retryable());
        assert!(!WorkerError::Timeout(10).is_retryable());
    }

    #[test]
    fn test_cancelled_variants() {
        assert!(WorkerError::Cancelled.is_cancelled());
        assert!(WorkerError::Translate(TranslateError::Cancelled).is_cancelled());
        assert!(WorkerError::Media(subx_media::MediaError::Cancelled).is_cancelled());
        assert!(!WorkerError::job_failed("x").is_cancelled());
    }
}
