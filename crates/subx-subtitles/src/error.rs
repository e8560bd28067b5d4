//! Subtitle error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for subtitle operations.
pub type SubtitleResult<T> = Result<T, SubtitleError>;

#[derive(Debug, Error)]
pub enum SubtitleError {
    #[error("Subtitle file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Unsupported subtitle format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SubtitleError {
    pub fn unsupported(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat(format.into())
    }

    pub fn invalid_timestamp(ts: impl Into<String>) -> Self {
        Self::InvalidTimestamp(ts.into())
    }
}
