//! Error types for Tally Tracker

use thiserror::Error;

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Result type for durable storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the tracker
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Drain attempted before any collector URL was supplied
    #[error("No collector configured, cannot track. Call set_collector_url first.")]
    CollectorNotConfigured,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Send did not complete in time
    #[error("Send timed out after {0} ms")]
    Timeout(u64),

    /// Durable storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Payload construction or encoding error
    #[error("Payload error: {0}")]
    Core(#[from] tally_core::CoreError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    /// Whether a later trigger may succeed without caller intervention
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TrackerError::Transport(_) | TrackerError::Timeout(_) | TrackerError::Storage(_)
        )
    }
}

/// Errors reported by durable storage backends
#[derive(Error, Debug)]
pub enum StorageError {
    /// Write would exceed the backend's quota
    #[error("Storage quota exceeded writing '{key}': need {needed} bytes, {available} available")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },

    /// Storage is disabled or inaccessible
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Value could not be serialized for storage
    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying I/O failure
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}
