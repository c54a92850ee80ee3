use async_trait::async_trait;
use bytes::Bytes;
use depot_storage::api::{
    CompletedPart, DeleteFailure, ListOutput, ListRequest, ListedObject, ObjectApi, ObjectMeta,
    PresignRequest,
};
use depot_storage::error::{StorageError, StorageResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// Per-operation call counters.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub list_page: AtomicUsize,
    pub head: AtomicUsize,
    pub put_object: AtomicUsize,
    pub create_multipart: AtomicUsize,
    pub upload_part: AtomicUsize,
    pub complete_multipart: AtomicUsize,
    pub abort_multipart: AtomicUsize,
    pub delete_object: AtomicUsize,
    pub delete_objects: AtomicUsize,
    pub presign: AtomicUsize,
}

#[derive(Debug, Default)]
struct Multipart {
    key: String,
    content_type: Option<String>,
    parts: BTreeMap<i32, Bytes>,
}

#[derive(Clone, Debug)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: Option<String>,
}

/// In-memory [`ObjectApi`] that records calls and can inject failures.
///
/// Keys starting with `denied/` are rejected by both delete calls.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct MemoryObjectApi {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    uploads: Mutex<HashMap<String, Multipart>>,
    next_upload: AtomicU64,
    /// Maximum entries per listing page (0 = honour the request).
    page_size: usize,
    /// Number of upcoming `upload_part` calls that fail transiently.
    pub fail_upload_parts: AtomicU32,
    /// Fail every `presign` call.
    pub fail_presign: AtomicBool,
    /// `head` never resolves.
    pub stall_head: AtomicBool,
    /// `get_range` never resolves.
    pub stall_get_range: AtomicBool,
    /// Cancel the token once this many URLs have been signed.
    cancel_after_presigns: Mutex<Option<(usize, CancellationToken)>>,
    pub presigned: Mutex<Vec<PresignRequest>>,
    pub calls: CallCounts,
}

#[allow(dead_code)]
impl MemoryObjectApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }

    pub fn insert(&self, key: &str, data: impl Into<Bytes>) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                content_type: None,
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn open_uploads(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn cancel_after_presigns(&self, count: usize, cancel: CancellationToken) {
        *self.cancel_after_presigns.lock().unwrap() = Some((count, cancel));
    }

    pub fn last_presign(&self) -> Option<PresignRequest> {
        self.presigned.lock().unwrap().last().cloned()
    }

    fn delete_denied(key: &str) -> bool {
        key.starts_with("denied/")
    }
}

#[async_trait]
impl ObjectApi for MemoryObjectApi {
    async fn list_page(&self, request: &ListRequest) -> StorageResult<ListOutput> {
        self.calls.list_page.fetch_add(1, Ordering::SeqCst);

        // Entries are (key, Some(object)) for objects and (prefix, None) for common prefixes.
        let mut entries: BTreeMap<String, Option<ListedObject>> = BTreeMap::new();
        for (key, stored) in self.objects.lock().unwrap().iter() {
            let Some(rest) = key.strip_prefix(&request.prefix) else {
                continue;
            };
            if let Some(delimiter) = &request.delimiter
                && let Some(pos) = rest.find(delimiter.as_str())
            {
                let prefix = format!("{}{}", request.prefix, &rest[..pos + delimiter.len()]);
                entries.entry(prefix).or_insert(None);
                continue;
            }
            entries.insert(
                key.clone(),
                Some(ListedObject {
                    key: key.clone(),
                    size: stored.data.len() as u64,
                    last_modified: Some(OffsetDateTime::UNIX_EPOCH),
                }),
            );
        }

        let start: usize = request
            .continuation
            .as_deref()
            .map(|token| token.parse().unwrap())
            .unwrap_or(0);
        let mut page_size = request.max_keys.map(|n| n as usize).unwrap_or(1000);
        if self.page_size > 0 {
            page_size = page_size.min(self.page_size);
        }

        let total = entries.len();
        let mut output = ListOutput::default();
        for (name, entry) in entries.into_iter().skip(start).take(page_size) {
            match entry {
                Some(object) => output.objects.push(object),
                None => output.common_prefixes.push(name),
            }
        }

        let end = start + page_size;
        if end < total {
            output.truncated = true;
            output.next_continuation = Some(end.to_string());
        }
        Ok(output)
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.calls.head.fetch_add(1, Ordering::SeqCst);
        if self.stall_head.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let objects = self.objects.lock().unwrap();
        let stored = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: stored.data.len() as u64,
            etag: Some(format!("etag-{}", stored.data.len())),
            last_modified: Some(OffsetDateTime::UNIX_EPOCH),
            content_type: stored.content_type.clone(),
        })
    }

    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        self.calls.put_object.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        if self.stall_get_range.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let objects = self.objects.lock().unwrap();
        let stored = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let len = stored.data.len() as u64;
        let end = end.min(len);
        if start > end {
            return Err(StorageError::InvalidRange(format!("{start}..{end}")));
        }
        Ok(stored.data.slice(start as usize..end as usize))
    }

    async fn create_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
        _expires: Option<OffsetDateTime>,
    ) -> StorageResult<String> {
        self.calls.create_multipart.fetch_add(1, Ordering::SeqCst);
        let id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst));
        self.uploads.lock().unwrap().insert(
            id.clone(),
            Multipart {
                key: key.to_string(),
                content_type: content_type.map(str::to_string),
                parts: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> StorageResult<CompletedPart> {
        self.calls.upload_part.fetch_add(1, Ordering::SeqCst);

        let remaining_failures = self.fail_upload_parts.load(Ordering::SeqCst);
        if remaining_failures > 0 {
            self.fail_upload_parts
                .store(remaining_failures - 1, Ordering::SeqCst);
            return Err(StorageError::transport("upload_part", key, "injected failure"));
        }

        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::NotFound(upload_id.to_string()))?;
        upload.parts.insert(part_number, data);
        Ok(CompletedPart {
            part_number,
            etag: format!("etag-{part_number}"),
        })
    }

    async fn complete_multipart(
        &self,
        _key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<()> {
        self.calls.complete_multipart.fetch_add(1, Ordering::SeqCst);
        let upload = self
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| StorageError::NotFound(upload_id.to_string()))?;

        let mut data = Vec::new();
        for part in &parts {
            let bytes = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| StorageError::InvalidKey(format!("missing part {}", part.part_number)))?;
            data.extend_from_slice(bytes);
        }

        self.objects.lock().unwrap().insert(
            upload.key,
            StoredObject {
                data: Bytes::from(data),
                content_type: upload.content_type,
            },
        );
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> StorageResult<()> {
        self.calls.abort_multipart.fetch_add(1, Ordering::SeqCst);
        self.uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(upload_id.to_string()))
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.calls.delete_object.fetch_add(1, Ordering::SeqCst);
        if Self::delete_denied(key) {
            return Err(StorageError::transport("delete_object", key, "access denied"));
        }
        self.objects
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete_objects(&self, keys: &[String]) -> StorageResult<Vec<DeleteFailure>> {
        self.calls.delete_objects.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.objects.lock().unwrap();
        let mut failures = Vec::new();
        for key in keys {
            if Self::delete_denied(key) {
                failures.push(DeleteFailure {
                    key: key.clone(),
                    code: "AccessDenied".to_string(),
                    message: "access denied".to_string(),
                });
            } else if objects.remove(key).is_none() {
                failures.push(DeleteFailure {
                    key: key.clone(),
                    code: "NoSuchKey".to_string(),
                    message: "missing".to_string(),
                });
            }
        }
        Ok(failures)
    }

    async fn presign(&self, request: &PresignRequest) -> StorageResult<String> {
        self.calls.presign.fetch_add(1, Ordering::SeqCst);
        if self.fail_presign.load(Ordering::SeqCst) {
            return Err(StorageError::transport("presign", &request.key, "signer offline"));
        }
        let signed = {
            let mut presigned = self.presigned.lock().unwrap();
            presigned.push(request.clone());
            presigned.len()
        };
        if let Some((count, cancel)) = &*self.cancel_after_presigns.lock().unwrap()
            && signed >= *count
        {
            cancel.cancel();
        }

        let mut url = format!(
            "https://mem.test/bucket/{}?X-Amz-Expires={}",
            request.key,
            request.expires_in.as_secs()
        );
        if let Some(part) = request.part_number {
            url.push_str(&format!("&partNumber={part}"));
        }
        if let Some(upload_id) = &request.upload_id {
            url.push_str(&format!("&uploadId={upload_id}"));
        }
        url.push_str("&X-Amz-Signature=sig");
        Ok(url)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
