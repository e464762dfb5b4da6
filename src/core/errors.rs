//! Custom error types for translation operations

use thiserror::Error;

use crate::core::parser::ParseError;

/// Translation-related errors
#[derive(Error, Debug)]
pub enum TranslationError {
    /// The model call itself failed (connection, timeout, malformed envelope)
    #[error("Transport error from {model}: {message}")]
    TransportError {
        model: String,
        message: String,
    },

    /// The model answered with nothing usable
    #[error("Empty response from {model}")]
    EmptyResponseError {
        model: String,
    },

    /// The model answered but the payload failed validation
    #[error("Validation failed: {}", format_parse_errors(.errors))]
    ValidationError {
        errors: Vec<ParseError>,
    },

    /// Every model and attempt was used up for a unit
    #[error("All {attempts} attempts exhausted for unit {unit_id}")]
    ExhaustionError {
        unit_id: String,
        attempts: u32,
    },

    /// A checkpoint could not be written; the next flush retries
    #[error("Checkpoint write failed: {path} - {message}")]
    CheckpointWriteError {
        path: String,
        message: String,
    },

    /// API request failed
    #[error("API error: {status} - {message}")]
    ApiError {
        status: u16,
        message: String,
    },

    /// Rate limit exceeded
    #[error("Rate limit exceeded. Retry after {retry_after:?} seconds")]
    RateLimitError {
        retry_after: Option<u64>,
    },

    /// File operation error
    #[error("File error: {path} - {message}")]
    FileError {
        path: String,
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
    },

    /// Invalid file format
    #[error("Invalid file format: {format}")]
    InvalidFormat {
        format: String,
    },

    /// Wrapper for anyhow errors
    #[error("Internal error: {0}")]
    InternalError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Reqwest error
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl TranslationError {
    /// Whether the retry policy should try the unit again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TranslationError::TransportError { .. }
                | TranslationError::EmptyResponseError { .. }
                | TranslationError::ValidationError { .. }
                | TranslationError::ApiError { .. }
                | TranslationError::RateLimitError { .. }
                | TranslationError::HttpError(_)
        )
    }
}

fn format_parse_errors(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<anyhow::Error> for TranslationError {
    fn from(err: anyhow::Error) -> Self {
        TranslationError::InternalError(err.to_string())
    }
}

/// Result type for translation operations
pub type Result<T> = std::result::Result<T, TranslationError>;
