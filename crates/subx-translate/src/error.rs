//! Translation error types.

use thiserror::Error;

/// Result type for translation operations.
pub type TranslateResult<T> = Result<T, TranslateError>;

/// Errors from translation engines and the chunked driver.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{engine} API error ({status}): {message}")]
    Api {
        engine: &'static str,
        status: u16,
        message: String,
    },

    #[error("Unsupported language for {engine}: {language}")]
    UnsupportedLanguage {
        engine: &'static str,
        language: String,
    },

    #[error("Unknown engine: {0}")]
    UnknownEngine(String),

    #[error("No API key available for {0}")]
    MissingApiKey(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Translation cancelled")]
    Cancelled,
}

impl TranslateError {
    pub fn api(engine: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            engine,
            status,
            message: message.into(),
        }
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Retrying cannot help: bad request, bad key, unknown model, bad language.
    pub fn is_permanent(&self) -> bool {
        match self {
            TranslateError::Api { status, .. } => matches!(status, 400 | 401 | 403 | 404),
            TranslateError::UnsupportedLanguage { .. }
            | TranslateError::MissingApiKey(_)
            | TranslateError::UnknownEngine(_) => true,
            _ => false,
        }
    }

    /// Network errors, timeouts, 429, 5xx and malformed model output.
    pub fn is_retryable(&self) -> bool {
        match self {
            TranslateError::Http(_) | TranslateError::InvalidResponse(_) => true,
            TranslateError::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
