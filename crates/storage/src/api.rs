//! Remote object API seam.
//!
//! [`ObjectApi`] is the set of remote calls a chunked-upload driver needs
//! from an S3-compatible service. The driver logic in
//! [`RemoteDriver`](crate::remote::RemoteDriver) only talks to this trait,
//! so it can be exercised against an in-memory implementation in tests.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use time::OffsetDateTime;

/// A boxed stream of listing pages.
pub type PageStream<'a> = Pin<Box<dyn Stream<Item = StorageResult<ListOutput>> + Send + 'a>>;

/// One listing request.
#[derive(Clone, Debug, Default)]
pub struct ListRequest {
    /// Key prefix to list under.
    pub prefix: String,
    /// Group keys by this delimiter (non-recursive listing).
    pub delimiter: Option<String>,
    /// Maximum keys per page.
    pub max_keys: Option<i32>,
    /// Continuation token from the previous page.
    pub continuation: Option<String>,
}

/// One object returned by a listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<OffsetDateTime>,
}

/// One page of listing results.
#[derive(Clone, Debug, Default)]
pub struct ListOutput {
    pub objects: Vec<ListedObject>,
    /// Directory markers when a delimiter was given.
    pub common_prefixes: Vec<String>,
    /// Token for the next page.
    pub next_continuation: Option<String>,
    /// Whether the backend has more results.
    pub truncated: bool,
}

/// Object metadata from a HEAD request.
#[derive(Clone, Debug, Default)]
pub struct ObjectMeta {
    /// Size in bytes.
    pub size: u64,
    /// Entity tag, quotes stripped.
    pub etag: Option<String>,
    /// Last modified time.
    pub last_modified: Option<OffsetDateTime>,
    /// Content type.
    pub content_type: Option<String>,
}

/// A part acknowledged by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    /// One-based part number.
    pub part_number: i32,
    pub etag: String,
}

/// Per-key failure reported by a batched delete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteFailure {
    pub key: String,
    pub code: String,
    pub message: String,
}

impl DeleteFailure {
    /// Check if the backend reported that the key did not exist.
    pub fn is_not_found(&self) -> bool {
        self.code == "NoSuchKey" || self.code == "NotFound"
    }
}

/// HTTP method of a presigned URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresignMethod {
    /// Read the object.
    Get,
    /// Upload one part of a multipart transaction.
    Put,
    /// Complete a multipart transaction.
    Post,
}

/// Parameters of a presigned URL.
#[derive(Clone, Debug)]
pub struct PresignRequest {
    pub method: PresignMethod,
    pub key: String,
    pub expires_in: Duration,
    /// Multipart transaction (Put and Post).
    pub upload_id: Option<String>,
    /// Part number (Put).
    pub part_number: Option<i32>,
    /// Expected content type (Put/Post).
    pub content_type: Option<String>,
    /// Response `Content-Disposition` override (Get).
    pub content_disposition: Option<String>,
}

impl PresignRequest {
    /// A presigned GET for `key`.
    pub fn get(key: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            method: PresignMethod::Get,
            key: key.into(),
            expires_in,
            upload_id: None,
            part_number: None,
            content_type: None,
            content_disposition: None,
        }
    }

    /// A presigned part upload.
    pub fn upload_part(
        key: impl Into<String>,
        upload_id: impl Into<String>,
        part_number: i32,
        expires_in: Duration,
    ) -> Self {
        Self {
            method: PresignMethod::Put,
            upload_id: Some(upload_id.into()),
            part_number: Some(part_number),
            ..Self::get(key, expires_in)
        }
    }

    /// A presigned multipart completion.
    pub fn complete(
        key: impl Into<String>,
        upload_id: impl Into<String>,
        expires_in: Duration,
    ) -> Self {
        Self {
            method: PresignMethod::Post,
            upload_id: Some(upload_id.into()),
            ..Self::get(key, expires_in)
        }
    }
}

/// Remote object storage operations.
///
/// Implementations return [`StorageError::NotFound`](crate::StorageError::NotFound)
/// for missing objects on `head`, `get_range` and `delete_object`.
#[async_trait]
pub trait ObjectApi: Send + Sync {
    /// Fetch one page of a listing.
    async fn list_page(&self, request: &ListRequest) -> StorageResult<ListOutput>;

    /// Get object metadata.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Store an object in one request.
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()>;

    /// Read bytes `[start, end)` of an object.
    async fn get_range(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes>;

    /// Open a multipart transaction and return its upload ID.
    async fn create_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
        expires: Option<OffsetDateTime>,
    ) -> StorageResult<String>;

    /// Upload one part of a multipart transaction.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> StorageResult<CompletedPart>;

    /// Complete a multipart transaction with the given parts.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<()>;

    /// Abort a multipart transaction.
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StorageResult<()>;

    /// Delete a single object.
    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    /// Delete a batch of objects; returns per-key failures.
    async fn delete_objects(&self, keys: &[String]) -> StorageResult<Vec<DeleteFailure>>;

    /// Sign a time-limited URL.
    async fn presign(&self, request: &PresignRequest) -> StorageResult<String>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Convenience methods on [`ObjectApi`].
pub trait ObjectApiExt: ObjectApi {
    /// Stream listing pages, following continuation tokens while the backend
    /// reports truncation.
    fn list_pages(&self, request: ListRequest) -> PageStream<'_> {
        let stream = async_stream::try_stream! {
            let mut request = request;
            loop {
                let page = self.list_page(&request).await?;
                let next = page.next_continuation.clone();
                let truncated = page.truncated;
                yield page;

                match next {
                    Some(token) if truncated => request.continuation = Some(token),
                    _ => break,
                }
            }
        };
        Box::pin(stream)
    }
}

impl<T: ObjectApi + ?Sized> ObjectApiExt for T {}
