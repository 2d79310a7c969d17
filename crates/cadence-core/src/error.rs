//! Error types for Cadence.

use thiserror::Error;

/// Result type alias using Cadence's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Cadence.
#[derive(Error, Debug)]
pub enum Error {
    // Decode engine errors
    #[error("Failed to open file {path}: {reason}")]
    FileOpen { path: String, reason: String },

    #[error("Decode engine error: {0}")]
    Engine(String),

    #[error("Encoder error: {0}")]
    Encoder(String),

    // Persistence errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(String),

    // Library errors
    #[error("Unknown library track: {0}")]
    UnknownTrack(String),

    #[error("Unknown playlist: {0}")]
    UnknownPlaylist(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true for I/O class failures (file open, persistence write).
    ///
    /// These are logged and absorbed at the component boundary; the affected
    /// item is skipped rather than failing the whole operation.
    pub const fn is_io_failure(&self) -> bool {
        matches!(
            self,
            Self::FileOpen { .. } | Self::Store(_) | Self::Database(_) | Self::Io(_)
        )
    }

    /// Shorthand for a file open failure.
    pub fn file_open(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FileOpen {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
