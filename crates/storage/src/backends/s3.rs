//! S3-compatible object API using AWS SDK.

use crate::api::{
    CompletedPart, DeleteFailure, ListOutput, ListRequest, ListedObject, ObjectApi, ObjectMeta,
    PresignMethod, PresignRequest,
};
use crate::error::{StorageError, StorageResult};
use crate::remote::PATH_SEGMENT;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::DateTime;
use aws_sdk_s3::types::{CompletedMultipartUpload, Delete, ObjectIdentifier};
use aws_sigv4::http_request::{
    PercentEncodingMode, SignableBody, SignableRequest, SignatureLocation, SigningSettings,
    UriPathNormalizationMode, sign,
};
use aws_sigv4::sign::v4;
use bytes::Bytes;
use depot_core::StoragePolicy;
use percent_encoding::utf8_percent_encode;
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;
use tokio::sync::OnceCell;
use tracing::instrument;

/// Maximum range size for get_range operations (128 MiB).
/// This prevents large memory allocations from caller-controlled ranges.
const MAX_RANGE_SIZE: u64 = 128 * 1024 * 1024;

/// S3 accepts presigned URLs valid for at most 7 days.
const MAX_PRESIGN_TTL: Duration = Duration::from_secs(604_800);

/// Marker included in lazy-credentials initialization errors so we can map them
/// to actionable storage config errors instead of generic transport failures.
const CREDENTIALS_INIT_ERROR_MARKER: &str = "depot-s3-lazy-credentials-init";
const CREDENTIALS_RESOLVE_ERROR_MARKER: &str = "depot-s3-lazy-credentials-resolve";

/// Lazily initializes the AWS default credentials chain on first signed request.
///
/// This avoids constructor-time side effects in environments where no
/// ambient credentials or root certificates are available.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn build_chain(
        &self,
    ) -> Result<aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        let region = aws_config::Region::new(self.region.clone());

        tokio::task::spawn(async move {
            aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                .region(region)
                .build()
                .await
        })
        .await
        .map_err(|join_err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_INIT_ERROR_MARKER}: failed to initialize AWS default credential chain: {join_err}"
            ))
        })
    }

    async fn chain(
        &self,
    ) -> Result<&aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        self.chain
            .get_or_try_init(|| async { self.build_chain().await })
            .await
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self.chain().await?;
        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_RESOLVE_ERROR_MARKER}: default AWS credentials resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

fn map_s3_operation_error<E>(
    err: aws_sdk_s3::error::SdkError<E>,
    op: &'static str,
    key: &str,
) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let err_text = err.to_string();
    if err_text.contains(CREDENTIALS_INIT_ERROR_MARKER)
        || err_text.contains(CREDENTIALS_RESOLVE_ERROR_MARKER)
    {
        return StorageError::Config(
            "S3 credential initialization failed. Configure access_key/secret_key on the policy or ensure ambient AWS credentials are available."
                .to_string(),
        );
    }

    StorageError::transport(op, key, err)
}

/// Convert an AWS SDK error to StorageError, mapping 404 to NotFound.
fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>, op: &'static str, key: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if let aws_sdk_s3::error::SdkError::ServiceError(ref service_err) = err
        && service_err.raw().status().as_u16() == 404
    {
        return StorageError::NotFound(key.to_string());
    }
    map_s3_operation_error(err, op, key)
}

fn to_offset_datetime(key: &str, dt: &DateTime) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(dt.secs())
        .inspect_err(|e| {
            tracing::warn!(
                key = %key,
                timestamp = dt.secs(),
                error = %e,
                "Failed to convert S3 timestamp"
            );
        })
        .ok()
}

/// Handle bare `host:port` endpoints (e.g. "minio:9000") by prepending http://.
pub(crate) fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint_lower = endpoint.to_lowercase();
    if endpoint_lower.starts_with("http://") || endpoint_lower.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    }
}

/// S3-compatible object API using AWS SDK.
pub struct S3ObjectApi {
    client: Client,
    /// Shared with the client; signs requests the SDK cannot presign.
    credentials: SharedCredentialsProvider,
    bucket: String,
    /// Normalized endpoint, or the canonical AWS endpoint for the region.
    endpoint: String,
    region: String,
    path_style: bool,
}

impl std::fmt::Debug for S3ObjectApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectApi")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3ObjectApi {
    /// Create a client for the bucket described by `policy`.
    ///
    /// Path-style addressing (`endpoint/bucket/key`) is used when the policy
    /// sets `s3_force_path_style`; it is required for MinIO and some
    /// S3-compatible services.
    pub fn from_policy(policy: &StoragePolicy) -> StorageResult<Self> {
        policy.validate()?;

        // Defer ambient credentials chain initialization until first signed request.
        let resolved_region = policy
            .settings
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());
        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        let credentials = if let (Some(key_id), Some(secret)) =
            (&policy.access_key, &policy.secret_key)
        {
            SharedCredentialsProvider::new(aws_sdk_s3::config::Credentials::new(
                key_id.clone(),
                secret.clone(),
                None, // session token
                None, // expiration
                "depot-policy",
            ))
        } else {
            SharedCredentialsProvider::new(LazyDefaultCredentialsProvider::new(
                resolved_region.clone(),
            ))
        };
        s3_config_builder = s3_config_builder.credentials_provider(credentials.clone());

        let normalized_endpoint = policy.server.as_deref().map(normalize_endpoint);
        if let Some(endpoint_url) = &normalized_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        let path_style = policy.settings.s3_force_path_style;
        if path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        let endpoint = match normalized_endpoint {
            Some(url) => url,
            None => format!("s3.{}.amazonaws.com", resolved_region),
        };

        Ok(Self {
            client,
            credentials,
            bucket: policy.bucket_name.clone(),
            endpoint,
            region: resolved_region,
            path_style,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn presigning_config(&self, key: &str, expires_in: Duration) -> StorageResult<PresigningConfig> {
        let ttl = expires_in.clamp(Duration::from_secs(1), MAX_PRESIGN_TTL);
        PresigningConfig::expires_in(ttl).map_err(|e| StorageError::transport("presign", key, e))
    }

    /// Object URL as the client addresses it: `endpoint/bucket/key` in
    /// path style, `bucket.endpoint/key` otherwise.
    fn object_url(&self, key: &str) -> String {
        let key = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        let (scheme, host) = match self.endpoint.split_once("://") {
            Some((scheme, host)) => (scheme, host.trim_end_matches('/')),
            None => ("https", self.endpoint.as_str()),
        };
        if self.path_style {
            format!("{scheme}://{host}/{}/{key}", self.bucket)
        } else {
            format!("{scheme}://{}.{host}/{key}", self.bucket)
        }
    }

    /// Sign `POST key?uploadId=..` with query-string SigV4.
    ///
    /// The SDK has no presigner for CompleteMultipartUpload, so the request
    /// is signed directly with the client's credentials.
    async fn presign_complete(
        &self,
        key: &str,
        upload_id: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let credentials = self.credentials.provide_credentials().await.map_err(|e| {
            StorageError::Config(format!("S3 credentials are not available for signing: {e}"))
        })?;
        let identity = credentials.into();

        let mut settings = SigningSettings::default();
        settings.signature_location = SignatureLocation::QueryParams;
        settings.expires_in = Some(expires_in.clamp(Duration::from_secs(1), MAX_PRESIGN_TTL));
        settings.percent_encoding_mode = PercentEncodingMode::Single;
        settings.uri_path_normalization_mode = UriPathNormalizationMode::Disabled;

        let params: aws_sigv4::http_request::SigningParams<'_> = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name("s3")
            .time(SystemTime::now())
            .settings(settings)
            .build()
            .map_err(|e| StorageError::transport("presign", key, e))?
            .into();

        let mut url = format!(
            "{}?uploadId={}",
            self.object_url(key),
            utf8_percent_encode(upload_id, PATH_SEGMENT)
        );
        let signable = SignableRequest::new(
            "POST",
            url.as_str(),
            std::iter::empty(),
            SignableBody::UnsignedPayload,
        )
        .map_err(|e| StorageError::transport("presign", key, e))?;
        let (instructions, _signature) = sign(signable, &params)
            .map_err(|e| StorageError::transport("presign", key, e))?
            .into_parts();

        for (name, value) in instructions.params() {
            let value: &str = value.as_ref();
            url.push('&');
            url.push_str(name);
            url.push('=');
            url.extend(utf8_percent_encode(value, PATH_SEGMENT));
        }
        Ok(url)
    }
}

#[async_trait]
impl ObjectApi for S3ObjectApi {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list_page(&self, request: &ListRequest) -> StorageResult<ListOutput> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&request.prefix)
            .set_delimiter(request.delimiter.clone())
            .set_max_keys(request.max_keys)
            .set_continuation_token(request.continuation.clone())
            .send()
            .await
            .map_err(|e| map_s3_operation_error(e, "list", &request.prefix))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?;
                Some(ListedObject {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj
                        .last_modified()
                        .and_then(|dt| to_offset_datetime(key, dt)),
                })
            })
            .collect();

        let common_prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();

        Ok(ListOutput {
            objects,
            common_prefixes,
            next_continuation: output.next_continuation_token().map(str::to_string),
            truncated: output.is_truncated() == Some(true),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "head", key))?;

        Ok(ObjectMeta {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            etag: output.e_tag().map(|t| t.trim_matches('"').to_string()),
            last_modified: output
                .last_modified()
                .and_then(|dt| to_offset_datetime(key, dt)),
            content_type: output.content_type().map(str::to_string),
        })
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .body(data.into())
            .send()
            .await
            .map_err(|e| map_s3_operation_error(e, "put_object", key))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_range(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        if end < start {
            return Err(StorageError::InvalidRange(format!(
                "end ({}) < start ({})",
                end, start
            )));
        }

        if end == start {
            return Ok(Bytes::new());
        }

        let range_size = end - start;
        if range_size > MAX_RANGE_SIZE {
            return Err(StorageError::InvalidRange(format!(
                "range size {} exceeds maximum {} bytes",
                range_size, MAX_RANGE_SIZE
            )));
        }

        // S3 Range header uses inclusive end
        let range_header = format!("bytes={}-{}", start, end - 1);

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(range_header)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "get_range", key))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::transport("get_range", key, e))?
            .into_bytes();

        Ok(bytes)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn create_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
        expires: Option<OffsetDateTime>,
    ) -> StorageResult<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .set_expires(expires.map(|t| DateTime::from_secs(t.unix_timestamp())))
            .send()
            .await
            .map_err(|e| map_s3_operation_error(e, "create_multipart", key))?;

        output.upload_id().map(str::to_string).ok_or_else(|| {
            StorageError::transport("create_multipart", key, "S3 did not return upload_id")
        })
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> StorageResult<CompletedPart> {
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(data.into())
            .send()
            .await
            .map_err(|e| map_s3_operation_error(e, "upload_part", key))?;

        let etag = output
            .e_tag()
            .ok_or_else(|| StorageError::transport("upload_part", key, "S3 did not return ETag"))?
            .to_string();

        Ok(CompletedPart { part_number, etag })
    }

    #[instrument(skip(self, parts), fields(backend = "s3", parts = parts.len()))]
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<()> {
        let parts = parts
            .into_iter()
            .map(|part| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.etag)
                    .build()
            })
            .collect();

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| map_s3_operation_error(e, "complete_multipart", key))?;

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "abort_multipart", key))?;

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "delete_object", key))?;

        Ok(())
    }

    #[instrument(skip(self, keys), fields(backend = "s3", count = keys.len()))]
    async fn delete_objects(&self, keys: &[String]) -> StorageResult<Vec<DeleteFailure>> {
        let first_key = keys.first().map(String::as_str).unwrap_or_default();

        let identifiers = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::transport("delete_objects", first_key, e))?;

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|e| StorageError::transport("delete_objects", first_key, e))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| map_s3_operation_error(e, "delete_objects", first_key))?;

        Ok(output
            .errors()
            .iter()
            .map(|err| DeleteFailure {
                key: err.key().unwrap_or_default().to_string(),
                code: err.code().unwrap_or_default().to_string(),
                message: err.message().unwrap_or_default().to_string(),
            })
            .collect())
    }

    #[instrument(skip(self, request), fields(backend = "s3", key = %request.key, method = ?request.method))]
    async fn presign(&self, request: &PresignRequest) -> StorageResult<String> {
        let key = request.key.as_str();
        let config = self.presigning_config(key, request.expires_in)?;
        let upload_id = || {
            request
                .upload_id
                .clone()
                .ok_or_else(|| StorageError::InvalidKey(format!("{key}: missing upload_id")))
        };

        let presigned = match request.method {
            PresignMethod::Get => self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .set_response_content_disposition(request.content_disposition.clone())
                .presigned(config)
                .await
                .map_err(|e| map_s3_operation_error(e, "presign", key))?,
            PresignMethod::Put => self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id()?)
                .part_number(request.part_number.unwrap_or(1))
                .presigned(config)
                .await
                .map_err(|e| map_s3_operation_error(e, "presign", key))?,
            PresignMethod::Post => {
                return self
                    .presign_complete(key, &upload_id()?, request.expires_in)
                    .await;
            }
        };

        Ok(presigned.uri().to_string())
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}
