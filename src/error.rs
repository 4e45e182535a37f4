//! Error types for catalog, cache and playback operations.

use thiserror::Error;

/// Main error type for all jamplay operations.
#[derive(Debug, Error)]
pub enum JamplayError {
    /// Track was not found locally or in the catalog.
    #[error("Track not found: {0}")]
    TrackNotFound(String),

    /// The catalog answered with a failed status envelope.
    #[error("Catalog error {code}: {message}")]
    CatalogStatus {
        /// Catalog error code.
        code: i64,
        /// Human readable message from the catalog.
        message: String,
    },

    /// A catalog record was missing a required field.
    #[error("Malformed catalog record: {0}")]
    MalformedRecord(String),

    /// No client id was configured for the catalog.
    #[error("Missing catalog client id (set JAMENDO_CLIENT_ID)")]
    MissingClientId,

    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),

    /// The playback engine reported a fault.
    #[error("Playback engine error: {0}")]
    Engine(String),

    /// HTTP request failed.
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Local store operation failed.
    #[error("Store error: {0}")]
    StoreError(#[from] rusqlite::Error),

    /// Background task panicked or was cancelled.
    #[error("Task error: {0}")]
    TaskError(#[from] tokio::task::JoinError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for jamplay operations.
pub type Result<T> = std::result::Result<T, JamplayError>;
