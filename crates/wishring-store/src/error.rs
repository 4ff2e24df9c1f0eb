//! Error types for wishring-store.

use std::path::PathBuf;

/// Result type for wishring-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in wishring-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored value could not be decoded.
    #[error("Corrupt stored value: {0}")]
    Decode(#[from] wishring_types::DecodeError),

    /// The database was written by a newer schema than this build understands.
    #[error("Unsupported schema version {found} (newest known is {supported})")]
    UnsupportedSchema { found: i32, supported: i32 },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
