//! Storage error types.

use depot_core::Transient;
use std::time::Duration;
use thiserror::Error;

/// Boxed transport-level error from a backend SDK.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("size mismatch: expected {expected} bytes, backend reports {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("{op} failed for {key}: {source}")]
    Transport {
        op: &'static str,
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("backend rejected delete of {key}: {code}")]
    DeleteRejected { key: String, code: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] depot_core::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("operation not supported by this driver: {0}")]
    Unsupported(&'static str),
}

impl StorageError {
    /// Wrap a backend error with operation and key context.
    pub fn transport(
        op: &'static str,
        key: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Transport {
            op,
            key: key.into(),
            source: source.into(),
        }
    }

    /// Check if this error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl Transient for StorageError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
