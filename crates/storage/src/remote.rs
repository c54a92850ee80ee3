//! Reference chunked-upload driver for S3-compatible backends.

use crate::api::{ListRequest, ObjectApi, ObjectApiExt, ObjectMeta, PresignRequest};
use crate::driver::{
    Capabilities, DeleteOutcome, ListProgress, PhysicalObject, SourceArgs, StorageDriver,
    UploadProps, UploadRequest,
};
use crate::entity_source::{EntitySource, RangeEntitySource};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use depot_core::config::{ThumbConfig, UploadConfig};
use depot_core::{
    Backoff, Capability, CapabilitySet, ChunkPlanner, ConstantBackoff, Entity, PolicyKind,
    StoragePolicy, UploadCredential, UploadSession,
};
use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Characters left unescaped in a path segment.
pub(crate) const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Keys per listing page.
const LIST_PAGE_SIZE: i32 = 1000;

/// Longest lifetime of an issued source URL.
const MAX_SOURCE_EXPIRE: Duration = Duration::from_secs(604_800);

/// Await `fut` unless `cancel` fires first or `after` elapses.
pub(crate) async fn bounded<T, F>(
    op: &'static str,
    after: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorageError::Cancelled),
        res = tokio::time::timeout(after, fut) => {
            res.map_err(|_| StorageError::Timeout { op, after })?
        }
    }
}

/// Static features of every remote driver.
const STATIC_FEATURES: CapabilitySet = CapabilitySet::empty()
    .with(Capability::UploadSentinelRequired)
    .with(Capability::ListSupported)
    .with(Capability::RangeReadSupported);

/// Storage driver over an [`ObjectApi`], bound to one policy.
///
/// Chunked uploads use the backend's multipart protocol: the driver opens a
/// transaction, signs one part-upload URL per chunk plus one completion URL,
/// and the client transfers bytes directly to the backend.
pub struct RemoteDriver {
    policy: StoragePolicy,
    api: Arc<dyn ObjectApi>,
    chunk_size: u64,
    upload: UploadConfig,
    thumb: ThumbConfig,
    backoff: Arc<dyn Backoff>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RemoteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDriver")
            .field("policy", &self.policy)
            .field("backend", &self.api.name())
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl RemoteDriver {
    pub fn new(
        policy: StoragePolicy,
        api: Arc<dyn ObjectApi>,
        upload: UploadConfig,
        thumb: ThumbConfig,
    ) -> Self {
        let backoff = Arc::new(ConstantBackoff::new(
            upload.chunk_retry_delay(),
            upload.chunk_retries,
        ));
        Self {
            chunk_size: policy.chunk_size(),
            policy,
            api,
            upload,
            thumb,
            backoff,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-flight calls with [`StorageError::Cancelled`] once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the per-chunk retry policy of server-side uploads.
    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn policy(&self) -> &StoragePolicy {
        &self.policy
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Run one backend call, bounded by the request timeout and the
    /// driver's cancellation token.
    async fn call<T, F>(&self, op: &'static str, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        bounded(op, self.upload.request_timeout(), &self.cancel, fut).await
    }

    /// Fail with `AlreadyExists` if an object is stored at `key`.
    async fn ensure_absent(&self, key: &str) -> StorageResult<()> {
        match self.call("head", self.api.head(key)).await {
            Ok(_) => Err(StorageError::AlreadyExists(key.to_string())),
            Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Abort a multipart transaction, logging instead of failing.
    async fn abort_quietly(&self, key: &str, upload_id: &str) {
        // Runs on failure paths, so it must not be cut short by the cancel token.
        let after = self.upload.request_timeout();
        let result = tokio::time::timeout(after, self.api.abort_multipart(key, upload_id)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                key = %key,
                upload_id = %upload_id,
                error = %e,
                "Failed to abort multipart upload, orphaned parts may remain"
            ),
            Err(_) => warn!(
                key = %key,
                upload_id = %upload_id,
                "Timed out aborting multipart upload, orphaned parts may remain"
            ),
        }
    }

    /// Lifetime of a source or thumbnail URL.
    fn url_ttl(&self, expire: Option<OffsetDateTime>) -> Duration {
        match expire {
            Some(expire) => {
                let secs = (expire - OffsetDateTime::now_utc()).whole_seconds();
                Duration::from_secs(secs.max(0) as u64)
            }
            None => Duration::from_secs(self.upload.default_url_ttl_secs),
        }
    }

    /// Public buckets serve unsigned URLs.
    fn finalize_url(&self, url: String) -> String {
        if self.policy.is_private {
            return url;
        }
        match url.split_once('?') {
            Some((base, _)) => base.to_string(),
            None => url,
        }
    }

    /// Image processing suffix appended to the object key of a thumbnail.
    fn thumb_suffix(&self) -> String {
        let mut suffix = format!(
            "@base@tag=imgScale&m=0&w={}&h={}",
            self.thumb.width, self.thumb.height
        );
        let format = self.thumb.format.to_ascii_lowercase();
        match format.as_str() {
            "jpg" | "webp" => {
                suffix.push_str(&format!("&q={}&F={}", self.thumb.quality, format));
            }
            "png" => suffix.push_str("&F=png"),
            _ => {}
        }
        suffix
    }

    /// URL the backend notifies when a chunked upload completes.
    fn callback_url(&self, session: &UploadSession) -> String {
        format!(
            "{}/api/v4/callback/{}/{}/{}",
            self.upload.site_url.trim_end_matches('/'),
            self.policy.kind,
            session.id,
            session.callback_secret
        )
    }

    /// Sign one part URL per chunk plus the completion URL.
    async fn sign_upload(
        &self,
        session: &UploadSession,
        upload_id: &str,
    ) -> StorageResult<(Vec<String>, String)> {
        let key = session.save_path.as_str();
        let mut planner = ChunkPlanner::without_retry(session.expected_size, session.chunk_size)?;
        let mut urls = Vec::with_capacity(planner.size_hint().0);

        while planner.next().is_some() {
            if self.cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            let url = planner
                .process(|chunk| {
                    let request = PresignRequest::upload_part(
                        key,
                        upload_id,
                        chunk.part_number(),
                        session.remaining(),
                    );
                    async move { self.call("presign", self.api.presign(&request)).await }
                })
                .await?;
            urls.push(url);
        }

        let complete = PresignRequest::complete(key, upload_id, session.remaining());
        let complete_url = self.call("presign", self.api.presign(&complete)).await?;
        Ok((urls, complete_url))
    }

    /// Stream `reader` into a multipart transaction, one chunk at a time.
    async fn upload_parts(
        &self,
        planner: &mut ChunkPlanner,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        key: &str,
        upload_id: &str,
    ) -> StorageResult<Vec<crate::api::CompletedPart>> {
        let mut parts = Vec::with_capacity(planner.size_hint().0);

        while let Some(chunk) = planner.next() {
            if self.cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            let mut buf = vec![0u8; chunk.len() as usize];
            reader.read_exact(&mut buf).await?;
            let data = Bytes::from(buf);

            let part = planner
                .process(|c| {
                    let data = data.clone();
                    async move {
                        self.call(
                            "upload_part",
                            self.api.upload_part(key, upload_id, c.part_number(), data),
                        )
                        .await
                    }
                })
                .await?;
            debug!(key = %key, part = part.part_number, "Uploaded part");
            parts.push(part);
        }

        Ok(parts)
    }
}

/// Trim a leading `/` and ensure a trailing `/` on non-empty bases.
fn normalize_base(base: &str) -> String {
    let base = base.trim_start_matches('/');
    if base.is_empty() || base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    }
}

fn base_name(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl StorageDriver for RemoteDriver {
    #[instrument(skip(self, on_progress), fields(policy = self.policy.id))]
    async fn list(
        &self,
        base: &str,
        recursive: bool,
        on_progress: ListProgress<'_>,
    ) -> StorageResult<Vec<PhysicalObject>> {
        let base = normalize_base(base);
        let request = ListRequest {
            prefix: base.clone(),
            delimiter: (!recursive).then(|| "/".to_string()),
            max_keys: Some(LIST_PAGE_SIZE),
            continuation: None,
        };

        let mut results = Vec::new();
        let mut pages = self.api.list_pages(request);
        loop {
            let next = self.call("list", async { Ok(pages.next().await) }).await?;
            let Some(page) = next else {
                break;
            };
            let page = page?;

            let dirs: Vec<_> = page
                .common_prefixes
                .iter()
                .filter_map(|prefix| {
                    let relative = prefix.strip_prefix(&base)?.trim_end_matches('/');
                    (!relative.is_empty()).then(|| PhysicalObject {
                        name: base_name(prefix),
                        source: String::new(),
                        relative_path: relative.to_string(),
                        size: 0,
                        is_dir: true,
                        last_modified: None,
                    })
                })
                .collect();
            on_progress(dirs.len());
            results.extend(dirs);

            let files: Vec<_> = page
                .objects
                .into_iter()
                .filter_map(|object| {
                    let relative = object.key.strip_prefix(&base)?;
                    // Skip the directory marker object of the base itself
                    if relative.is_empty() {
                        return None;
                    }
                    Some(PhysicalObject {
                        name: base_name(&object.key),
                        relative_path: relative.to_string(),
                        source: object.key.clone(),
                        size: object.size,
                        is_dir: false,
                        last_modified: object.last_modified,
                    })
                })
                .collect();
            on_progress(files.len());
            results.extend(files);
        }

        Ok(results)
    }

    #[instrument(skip(self, request), fields(policy = self.policy.id, key = %request.props.save_path, size = request.props.size))]
    async fn put(&self, request: UploadRequest) -> StorageResult<()> {
        let UploadRequest { props, mut reader } = request;
        let key = props.save_path.as_str();

        if !props.overwrite {
            self.ensure_absent(key).await?;
        }

        let content_type = props.content_type();
        let mut planner = ChunkPlanner::new(props.size, self.chunk_size, self.backoff.clone())?;

        if planner.chunk_count() <= 1 {
            let mut buf = Vec::with_capacity(props.size as usize);
            (&mut reader).take(props.size).read_to_end(&mut buf).await?;
            if buf.len() as u64 != props.size {
                return Err(StorageError::SizeMismatch {
                    expected: props.size,
                    actual: buf.len() as u64,
                });
            }
            return self
                .call(
                    "put_object",
                    self.api
                        .put_object(key, Bytes::from(buf), Some(content_type.as_str())),
                )
                .await;
        }

        let upload_id = self
            .call(
                "create_multipart",
                self.api
                    .create_multipart(key, Some(content_type.as_str()), None),
            )
            .await?;

        let result = async {
            let parts = self
                .upload_parts(&mut planner, &mut reader, key, &upload_id)
                .await?;
            self.call(
                "complete_multipart",
                self.api.complete_multipart(key, &upload_id, parts),
            )
            .await
        }
        .await;

        if let Err(e) = result {
            self.abort_quietly(key, &upload_id).await;
            return Err(e);
        }

        debug!(key = %key, chunks = planner.chunk_count(), "Uploaded object in parts");
        Ok(())
    }

    #[instrument(skip(self, keys), fields(policy = self.policy.id, count = keys.len()))]
    async fn delete(&self, keys: &[String]) -> StorageResult<DeleteOutcome> {
        let mut outcome = DeleteOutcome::default();

        for group in keys.chunks(self.policy.delete_batch_size()) {
            if let [key] = group {
                match self.call("delete_object", self.api.delete_object(key)).await {
                    Ok(()) | Err(StorageError::NotFound(_)) => {}
                    Err(e) => {
                        outcome.failed.push(key.clone());
                        outcome.last_error = Some(e);
                    }
                }
                continue;
            }

            match self.call("delete_objects", self.api.delete_objects(group)).await {
                Ok(failures) => {
                    for failure in failures.into_iter().filter(|f| !f.is_not_found()) {
                        debug!(
                            key = %failure.key,
                            code = %failure.code,
                            message = %failure.message,
                            "Failed to delete object"
                        );
                        outcome.failed.push(failure.key.clone());
                        outcome.last_error = Some(StorageError::DeleteRejected {
                            key: failure.key,
                            code: failure.code,
                        });
                    }
                }
                Err(e) => {
                    warn!(count = group.len(), error = %e, "Batch delete failed");
                    outcome.failed.extend(group.iter().cloned());
                    outcome.last_error = Some(e);
                }
            }
        }

        Ok(outcome)
    }

    #[instrument(skip(self, entity), fields(policy = self.policy.id, key = %entity.source))]
    async fn thumb(
        &self,
        expire: Option<OffsetDateTime>,
        _ext: &str,
        entity: &Entity,
    ) -> StorageResult<String> {
        if self.policy.kind != PolicyKind::Ks3 {
            return Err(StorageError::Unsupported("thumb"));
        }

        let key = format!("{}{}", entity.source, self.thumb_suffix());
        let request = PresignRequest::get(key, self.url_ttl(expire));
        let url = self.call("presign", self.api.presign(&request)).await?;
        Ok(self.finalize_url(url))
    }

    #[instrument(skip(self, entity, args), fields(policy = self.policy.id, key = %entity.source))]
    async fn source(&self, entity: &Entity, args: &SourceArgs) -> StorageResult<String> {
        let mut request = PresignRequest::get(entity.source.clone(), self.url_ttl(args.expire));
        if args.is_download {
            let name = args
                .display_name
                .clone()
                .unwrap_or_else(|| base_name(&entity.source));
            request.content_disposition = Some(format!(
                "attachment; filename=\"{}\"",
                utf8_percent_encode(&name, PATH_SEGMENT)
            ));
        }

        let url = self.call("presign", self.api.presign(&request)).await?;
        Ok(self.finalize_url(url))
    }

    #[instrument(skip(self, session, props), fields(policy = self.policy.id, session = %session.id, key = %session.save_path))]
    async fn token(
        &self,
        session: &mut UploadSession,
        props: &UploadProps,
    ) -> StorageResult<UploadCredential> {
        session.ensure_open()?;
        self.ensure_absent(&session.save_path).await?;

        session.assign_chunk_size(self.chunk_size)?;
        session.callback = Some(self.callback_url(session));

        let content_type = props.content_type();
        let upload_id = self
            .call(
                "create_multipart",
                self.api.create_multipart(
                    &session.save_path,
                    Some(content_type.as_str()),
                    Some(session.expire_at),
                ),
            )
            .await?;
        session.upload_id = Some(upload_id.clone());

        let (upload_urls, complete_url) = match self.sign_upload(session, &upload_id).await {
            Ok(signed) => signed,
            Err(e) => {
                self.abort_quietly(&session.save_path, &upload_id).await;
                return Err(e);
            }
        };

        debug!(
            upload_id = %upload_id,
            chunks = upload_urls.len(),
            "Issued upload credential"
        );

        Ok(UploadCredential {
            upload_id,
            upload_urls,
            complete_url,
            session_id: session.id.to_string(),
            chunk_size: session.chunk_size,
        })
    }

    #[instrument(skip(self, session), fields(policy = self.policy.id, session = %session.id))]
    async fn cancel_token(&self, session: &UploadSession) -> StorageResult<()> {
        let upload_id = session.upload_id.as_deref().ok_or_else(|| {
            depot_core::Error::UploadSession(format!(
                "session {} has no backend transaction",
                session.id
            ))
        })?;

        self.call(
            "abort_multipart",
            self.api.abort_multipart(&session.save_path, upload_id),
        )
        .await
    }

    #[instrument(skip(self, session), fields(policy = self.policy.id, session = %session.id))]
    async fn complete_upload(&self, session: &UploadSession) -> StorageResult<()> {
        if session.sentinel_task_id.is_none() {
            return Ok(());
        }

        let meta = self.meta(&session.save_path).await?;
        if meta.size != session.expected_size {
            return Err(StorageError::SizeMismatch {
                expected: session.expected_size,
                actual: meta.size,
            });
        }
        Ok(())
    }

    async fn meta(&self, path: &str) -> StorageResult<ObjectMeta> {
        self.call("head", self.api.head(path)).await
    }

    async fn open_range(&self, entity: &Entity) -> StorageResult<Box<dyn EntitySource>> {
        Ok(Box::new(RangeEntitySource::new(
            self.api.clone(),
            entity.clone(),
            self.upload.request_timeout(),
            self.cancel.clone(),
        )))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            static_features: STATIC_FEATURES,
            media_meta_proxy: self.policy.settings.media_meta_generator_proxy,
            thumb_proxy: self.policy.settings.thumb_generator_proxy,
            max_source_expire: MAX_SOURCE_EXPIRE,
        }
    }
}
