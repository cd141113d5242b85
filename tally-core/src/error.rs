//! Error types for Tally core operations
//!
//! Core operations are pure data transformations, so the error surface is
//! small: malformed metadata input, malformed payload records (usually read
//! back from durable storage) and JSON serialization failures.
//!
//! Each variant carries a stable error code (e.g. `INVALID_METADATA`) for
//! logging and programmatic handling.

use thiserror::Error;

/// Result type alias for core operations
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while building or encoding payloads
#[derive(Error, Debug)]
pub enum CoreError {
    /// Metadata input was not a JSON object
    #[error("Invalid metadata: {reason}. Metadata trees must be JSON objects.")]
    InvalidMetadata { reason: String },

    /// A payload record could not be reconstructed
    #[error("Invalid payload record: {reason}")]
    InvalidPayload { reason: String },

    /// JSON serialization or parsing failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Stable error code for logs and callers
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidMetadata { .. } => "INVALID_METADATA",
            CoreError::InvalidPayload { .. } => "INVALID_PAYLOAD",
            CoreError::Serialization(_) => "JSON_ERROR",
        }
    }
}
