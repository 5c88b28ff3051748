//! Error types for ledger store operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during ledger and task store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A record with the given id does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind (`worklog`, `task`).
        kind: &'static str,
        /// Requested identifier.
        id: String,
    },

    /// The requested change would leave a record in an inconsistent state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Reading or writing a file failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A document on disk could not be decoded.
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A document could not be encoded.
    #[error("Failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The document declares a format version this build does not read.
    #[error("Unsupported document version: {0}")]
    UnsupportedVersion(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true for [`StoreError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;
