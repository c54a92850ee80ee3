//! The storage driver contract.
//!
//! A [`StorageDriver`] is bound to one storage policy and exposes the uniform
//! set of operations the file manager performs against any backend: listing
//! and deleting objects, issuing time-limited URLs, streaming uploads, and
//! the chunked presigned upload protocol.
//!
//! The chunked protocol has the same shape on every backend: duplicate check,
//! plan chunks, sign one URL per chunk plus one finalize URL, let the client
//! upload directly, then verify size when the completion notice arrives.

use crate::api::ObjectMeta;
use crate::entity_source::EntitySource;
use crate::error::StorageResult;
use async_trait::async_trait;
use depot_core::{CapabilitySet, Entity, UploadCredential, UploadSession};
use std::pin::Pin;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::AsyncRead;

/// Progress callback for listings; receives the number of objects added per batch.
pub type ListProgress<'a> = &'a (dyn Fn(usize) + Send + Sync);

/// An object found by [`StorageDriver::list`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhysicalObject {
    /// Last path segment.
    pub name: String,
    /// Full backend key (empty for directories).
    pub source: String,
    /// Path relative to the listing base.
    pub relative_path: String,
    /// Size in bytes (0 for directories).
    pub size: u64,
    pub is_dir: bool,
    pub last_modified: Option<OffsetDateTime>,
}

/// Properties of an upload.
#[derive(Clone, Debug, Default)]
pub struct UploadProps {
    /// Destination object key.
    pub save_path: String,
    /// Declared size in bytes.
    pub size: u64,
    /// MIME type; detected from the file name when absent.
    pub mime_type: Option<String>,
    /// Replace an existing object at `save_path`.
    pub overwrite: bool,
}

impl UploadProps {
    pub fn new(save_path: impl Into<String>, size: u64) -> Self {
        Self {
            save_path: save_path.into(),
            size,
            ..Self::default()
        }
    }

    /// MIME type to send to the backend.
    pub fn content_type(&self) -> String {
        self.mime_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&self.save_path)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        })
    }
}

/// A server-side upload: properties plus the byte stream.
pub struct UploadRequest {
    pub props: UploadProps,
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl UploadRequest {
    pub fn new(props: UploadProps, reader: impl AsyncRead + Send + 'static) -> Self {
        Self {
            props,
            reader: Box::pin(reader),
        }
    }
}

impl std::fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRequest")
            .field("props", &self.props)
            .finish_non_exhaustive()
    }
}

/// Result of a batched delete. Partial failure is a value, not an error.
#[derive(Debug, Default)]
pub struct DeleteOutcome {
    /// Keys that could not be deleted.
    pub failed: Vec<String>,
    /// The last error encountered, if any.
    pub last_error: Option<crate::StorageError>,
}

impl DeleteOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Arguments for [`StorageDriver::source`].
#[derive(Clone, Debug, Default)]
pub struct SourceArgs {
    /// When the URL stops working; `None` uses the driver default.
    pub expire: Option<OffsetDateTime>,
    /// Ask the browser to download instead of display.
    pub is_download: bool,
    /// File name offered in the download prompt.
    pub display_name: Option<String>,
}

/// Static features of a driver.
#[derive(Clone, Debug, Default)]
pub struct Capabilities {
    pub static_features: CapabilitySet,
    /// Media metadata is extracted by the backend.
    pub media_meta_proxy: bool,
    /// Thumbnails are generated by the backend.
    pub thumb_proxy: bool,
    /// Longest lifetime a source URL may have.
    pub max_source_expire: Duration,
}

/// Uniform operations over one storage policy.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// List objects under `base`.
    ///
    /// `base` is normalized (leading `/` trimmed, trailing `/` added when not
    /// empty). Non-recursive listings return directories as markers only.
    async fn list(
        &self,
        base: &str,
        recursive: bool,
        on_progress: ListProgress<'_>,
    ) -> StorageResult<Vec<PhysicalObject>>;

    /// Upload a byte stream to `request.props.save_path`.
    async fn put(&self, request: UploadRequest) -> StorageResult<()>;

    /// Delete keys; failing keys do not stop the rest.
    async fn delete(&self, keys: &[String]) -> StorageResult<DeleteOutcome>;

    /// Time-limited thumbnail URL for an image entity.
    async fn thumb(
        &self,
        expire: Option<OffsetDateTime>,
        ext: &str,
        entity: &Entity,
    ) -> StorageResult<String>;

    /// Time-limited download URL.
    async fn source(&self, entity: &Entity, args: &SourceArgs) -> StorageResult<String>;

    /// Begin a chunked upload and issue presigned credentials.
    ///
    /// Fixes the session's chunk size and callback, and opens the backend
    /// transaction.
    async fn token(
        &self,
        session: &mut UploadSession,
        props: &UploadProps,
    ) -> StorageResult<UploadCredential>;

    /// Abort the session's backend transaction.
    async fn cancel_token(&self, session: &UploadSession) -> StorageResult<()>;

    /// Verify a completed chunked upload.
    async fn complete_upload(&self, session: &UploadSession) -> StorageResult<()>;

    /// Object metadata for a key.
    async fn meta(&self, path: &str) -> StorageResult<ObjectMeta>;

    /// Random-access reader over an entity's bytes.
    async fn open_range(&self, entity: &Entity) -> StorageResult<Box<dyn EntitySource>>;

    /// Static features. Performs no I/O.
    fn capabilities(&self) -> Capabilities;
}
