//! Archive error types.

use depot_storage::StorageError;
use thiserror::Error;

/// Archive creation and listing errors.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("action not supported: {0}")]
    NotSupported(String),

    #[error("archive source is {size} bytes, over the {limit} byte decompress limit")]
    SourceTooLarge { size: u64, limit: u64 },

    #[error("entity not found for {0}")]
    EntityNotFound(String),

    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("unsupported text encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("cannot archive {0}: the filesystem root is not a valid source")]
    InvalidArchiveRoot(String),

    #[error("archive source size exceeds the {limit} byte limit")]
    SizeExceeded { limit: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("7z error: {0}")]
    SevenZip(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ArchiveError {
    /// Check if the caller can fix the request and retry.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NotSupported(_)
                | Self::SourceTooLarge { .. }
                | Self::UnsupportedFormat(_)
                | Self::UnsupportedEncoding(_)
                | Self::InvalidArchiveRoot(_)
        )
    }
}

/// Result type for archive operations.
pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;
