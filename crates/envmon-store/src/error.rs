//! Error types for envmon-store.

use std::path::PathBuf;

use envmon_types::ParseError;

/// Result type for envmon-store operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in envmon-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The storage medium (root directory) is not present.
    #[error("Storage medium not present at {path}")]
    MediumAbsent { path: PathBuf },

    /// The store has not been initialized, or lost its medium.
    #[error("Storage is not ready")]
    NotReady,

    /// Failed to create the data directory.
    #[error("Failed to create data directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to open a partition file for appending.
    #[error("Failed to open {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to append a record.
    #[error("Failed to write {path}: {source}")]
    WriteFailed { path: PathBuf, source: csv::Error },

    /// Failed to read a partition file.
    #[error("Failed to read {path}: {source}")]
    Read { path: PathBuf, source: csv::Error },

    /// A stored record could not be parsed.
    #[error("Invalid record in {path} at line {line}: {source}")]
    Parse {
        path: PathBuf,
        line: u64,
        source: ParseError,
    },

    /// Failed to rename a partition when marking it synced.
    #[error("Failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the error means the medium went away.
    pub fn is_medium_absent(&self) -> bool {
        matches!(self, StorageError::MediumAbsent { .. })
    }
}
