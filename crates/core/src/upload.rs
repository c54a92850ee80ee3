//! Upload session types and lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadSessionId(Uuid);

impl UploadSessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::UploadSession(format!("invalid session ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadSessionId({})", self.0)
    }
}

impl fmt::Display for UploadSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upload session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// Credentials may be issued and chunks acknowledged.
    Open,
    /// The backend confirmed the upload.
    Completed,
    /// The upload was cancelled and its transaction aborted.
    Cancelled,
    /// The session expired before completion.
    Expired,
}

impl UploadState {
    /// Check if the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }
}

/// A chunked upload in progress.
///
/// Created by the upload orchestrator, filled in by the driver when it issues
/// credentials, and invalidated on completion, cancellation or expiry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    /// Session identifier.
    pub id: UploadSessionId,
    /// Destination object key.
    pub save_path: String,
    /// Declared size of the upload in bytes.
    pub expected_size: u64,
    /// When credentials issued for this session stop working.
    #[serde(with = "time::serde::rfc3339")]
    pub expire_at: OffsetDateTime,
    /// Chunk size, fixed once the driver assigns it (0 = not yet assigned).
    pub chunk_size: u64,
    /// Backend multipart transaction ID.
    pub upload_id: Option<String>,
    /// Sentinel task that must confirm the upload before completion.
    pub sentinel_task_id: Option<i64>,
    /// Shared secret carried by the completion callback URL.
    pub callback_secret: String,
    /// Completion callback URL.
    pub callback: Option<String>,
    /// Current state.
    pub state: UploadState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl UploadSession {
    /// Create a new session expiring `expires_in` from now.
    pub fn new(save_path: impl Into<String>, expected_size: u64, expires_in: time::Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: UploadSessionId::new(),
            save_path: save_path.into(),
            expected_size,
            expire_at: now + expires_in,
            chunk_size: 0,
            upload_id: None,
            sentinel_task_id: None,
            callback_secret: Uuid::new_v4().simple().to_string(),
            callback: None,
            state: UploadState::Open,
            created_at: now,
        }
    }

    /// Attach a sentinel task.
    pub fn with_sentinel(mut self, task_id: i64) -> Self {
        self.sentinel_task_id = Some(task_id);
        self
    }

    /// Check if the session has expired.
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expire_at
    }

    /// Seconds until expiry, clamped at zero.
    pub fn remaining(&self) -> std::time::Duration {
        let secs = (self.expire_at - OffsetDateTime::now_utc()).whole_seconds();
        std::time::Duration::from_secs(secs.max(0) as u64)
    }

    /// Fail unless the session can still be acted on.
    pub fn ensure_open(&self) -> crate::Result<()> {
        if self.state != UploadState::Open {
            return Err(crate::Error::UploadSession(format!(
                "session {} is {:?}",
                self.id, self.state
            )));
        }
        if self.is_expired() {
            return Err(crate::Error::UploadSession(format!(
                "session {} expired at {}",
                self.id, self.expire_at
            )));
        }
        Ok(())
    }

    /// Fix the chunk size. Re-assigning the same size is a no-op.
    pub fn assign_chunk_size(&mut self, chunk_size: u64) -> crate::Result<()> {
        if chunk_size == 0 {
            return Err(crate::Error::InvalidChunkSize(chunk_size));
        }
        if self.chunk_size != 0 && self.chunk_size != chunk_size {
            return Err(crate::Error::ChunkSizeFixed {
                fixed: self.chunk_size,
                requested: chunk_size,
            });
        }
        self.chunk_size = chunk_size;
        Ok(())
    }

    /// Calculate the expected number of chunks.
    pub fn expected_chunk_count(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.expected_size.div_ceil(self.chunk_size)
    }

    /// Move to a terminal state.
    pub fn finish(&mut self, state: UploadState) -> crate::Result<()> {
        if self.state.is_terminal() {
            return Err(crate::Error::UploadSession(format!(
                "session {} already {:?}",
                self.id, self.state
            )));
        }
        self.state = state;
        Ok(())
    }
}

/// Credentials handed to a client for a chunked, presigned upload.
///
/// `upload_urls.len()` always equals the chunk count of the session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCredential {
    /// Backend multipart transaction ID.
    pub upload_id: String,
    /// One presigned URL per chunk, in chunk order.
    pub upload_urls: Vec<String>,
    /// Presigned URL that finalizes the transaction.
    pub complete_url: String,
    /// Owning session.
    pub session_id: String,
    /// Chunk size the client must split the file with.
    pub chunk_size: u64,
}
