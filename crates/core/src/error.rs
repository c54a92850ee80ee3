//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid chunk size: {0} (must be greater than zero)")]
    InvalidChunkSize(u64),

    #[error("chunk index {index} out of range (chunk count {count})")]
    ChunkOutOfRange { index: u64, count: u64 },

    #[error("chunk size already fixed at {fixed} for this session, refusing {requested}")]
    ChunkSizeFixed { fixed: u64, requested: u64 },

    #[error("upload session error: {0}")]
    UploadSession(String),

    #[error("invalid storage policy: {0}")]
    InvalidPolicy(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
