//! Error types for proclock.
//!
//! Uses thiserror for derive macros. Every variant carries the path of the
//! lock artifact involved so messages are actionable without extra context.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for lock operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// An unexpected OS-level failure while attempting acquisition.
    ///
    /// Not retried automatically.
    #[error("failed to acquire lock '{}': {}", .path.display(), .source)]
    AcquisitionFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configured wait elapsed without acquiring the lock.
    #[error("timed out after {:?} waiting for lock '{}'", .waited, .path.display())]
    Timeout { path: PathBuf, waited: Duration },

    /// A handle tried to release a lock it no longer holds.
    ///
    /// This is a program-logic bug, never a transient condition.
    #[error(
        "lock '{}' is not owned by this handle (expected lock id {}, found {})",
        .path.display(),
        .expected,
        .found.as_deref().unwrap_or("none")
    )]
    Ownership {
        path: PathBuf,
        expected: String,
        found: Option<String>,
    },

    /// Lock metadata could not be parsed.
    #[error("lock record '{}' is corrupt: {}", .path.display(), .reason)]
    RecordCorrupt { path: PathBuf, reason: String },

    /// A filesystem operation outside acquisition failed (release, backup, restore).
    #[error("failed to {} '{}': {}", .operation, .path.display(), .source)]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Invalid configuration or lock name.
    #[error("invalid lock configuration: {0}")]
    Config(String),
}

impl LockError {
    /// Whether retrying later with a fresh timeout is sensible.
    ///
    /// Only a timeout means "resource busy"; everything else needs investigation.
    pub fn is_transient(&self) -> bool {
        matches!(self, LockError::Timeout { .. })
    }

    pub(crate) fn acquisition(path: impl Into<PathBuf>, source: io::Error) -> Self {
        LockError::AcquisitionFailed {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        LockError::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;
