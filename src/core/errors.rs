//! Custom error types for translation operations

use thiserror::Error;

use crate::dom::DomError;

/// Translation-related errors
#[derive(Error, Debug)]
pub enum TranslationError {
    /// Work was cancelled because the page navigated or the request was superseded
    #[error("Translation aborted")]
    Aborted,

    /// API request failed
    #[error("API error: {status} - {message}")]
    ApiError {
        status: u16,
        message: String,
    },

    /// Network error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
    },

    /// Invalid response from API
    #[error("Invalid response: {message}")]
    InvalidResponseError {
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
    },

    /// The document changed underneath an operation
    #[error("DOM error: {0}")]
    Dom(#[from] DomError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Reqwest error
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl TranslationError {
    /// Whether this is the cooperative cancellation signal
    pub fn is_aborted(&self) -> bool {
        matches!(self, TranslationError::Aborted)
    }
}

/// Result type for translation operations
pub type Result<T> = std::result::Result<T, TranslationError>;
