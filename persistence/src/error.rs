//! Error types for session operations

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum SessionError {
    /// Session name missing or conflicting with the registry policy
    #[error("Session identity error: {0}")]
    Identity(String),

    /// Strict lookup of a key that is neither cached nor on disk
    #[error("Key not found in session: {key}")]
    KeyNotFound { key: String },

    /// Key that cannot be mapped onto a file in the data directory
    #[error("Invalid session key: {key:?}")]
    InvalidKey { key: String },

    /// Unknown extension, or a format with no working codec
    #[error("Unsupported format '.{extension}': {reason}")]
    UnsupportedFormat {
        extension: String,
        reason: &'static str,
    },

    /// Snapshot directory absent or incomplete
    #[error("Snapshot missing or incomplete: {path}")]
    SnapshotMissing { path: PathBuf },

    /// History depth must hold at least one record
    #[error("Invalid history depth: {0} (must be at least 1)")]
    InvalidDepth(usize),

    /// I/O errors during file operations
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl SessionError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn unsupported(extension: impl Into<String>, reason: &'static str) -> Self {
        Self::UnsupportedFormat {
            extension: extension.into(),
            reason,
        }
    }
}
