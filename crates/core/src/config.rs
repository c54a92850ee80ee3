//! Configuration types shared across crates.

use crate::policy::{PolicyKind, PolicySettings, StoragePolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upload protocol configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Upload session lifetime in seconds.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Lifetime of source and thumbnail URLs when the caller gives no expiry.
    #[serde(default = "default_url_ttl_secs")]
    pub default_url_ttl_secs: u64,
    /// Per-request timeout for backend calls in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retries per chunk on transient failures during server-side uploads.
    #[serde(default = "default_chunk_retries")]
    pub chunk_retries: u32,
    /// Sleep between chunk retries in milliseconds.
    #[serde(default = "default_chunk_retry_delay_ms")]
    pub chunk_retry_delay_ms: u64,
    /// Public base URL completion callbacks are built on.
    #[serde(default = "default_site_url")]
    pub site_url: String,
}

fn default_session_ttl_secs() -> u64 {
    86400 // 24 hours
}

fn default_url_ttl_secs() -> u64 {
    crate::DEFAULT_URL_TTL_SECS
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_chunk_retries() -> u32 {
    5
}

fn default_chunk_retry_delay_ms() -> u64 {
    1000
}

fn default_site_url() -> String {
    "http://localhost:5212".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            default_url_ttl_secs: default_url_ttl_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            chunk_retries: default_chunk_retries(),
            chunk_retry_delay_ms: default_chunk_retry_delay_ms(),
            site_url: default_site_url(),
        }
    }
}

impl UploadConfig {
    /// Get the session lifetime as a Duration.
    pub fn session_ttl(&self) -> time::Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.session_ttl_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn chunk_retry_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_retry_delay_ms)
    }

    /// Validate upload configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout_secs == 0 {
            return Err("upload.request_timeout_secs must be greater than zero".to_string());
        }
        if !(self.site_url.starts_with("http://") || self.site_url.starts_with("https://")) {
            return Err(format!(
                "upload.site_url must be an http(s) URL, got {:?}",
                self.site_url
            ));
        }
        Ok(())
    }
}

/// Compression applied to entries of created archives.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveCompression {
    /// Store entries uncompressed.
    #[default]
    Store,
    /// Deflate entries.
    Deflate,
}

/// Archive creation and listing configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Largest archive, in bytes, whose contents may be listed (0 = unlimited).
    #[serde(default = "default_max_decompress_size")]
    pub max_decompress_size: u64,
    /// Largest archive, in bytes, that may be created (0 = unlimited).
    #[serde(default)]
    pub max_archive_size: u64,
    /// How long a listing stays cached.
    #[serde(default = "default_listing_cache_ttl_secs")]
    pub listing_cache_ttl_secs: u64,
    /// Maximum number of cached listings.
    #[serde(default = "default_listing_cache_capacity")]
    pub listing_cache_capacity: u64,
    /// Compression for created archives.
    #[serde(default)]
    pub compression: ArchiveCompression,
}

fn default_max_decompress_size() -> u64 {
    1 << 30 // 1 GiB
}

fn default_listing_cache_ttl_secs() -> u64 {
    crate::ARCHIVE_LIST_CACHE_TTL_SECS
}

fn default_listing_cache_capacity() -> u64 {
    1024
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_decompress_size: default_max_decompress_size(),
            max_archive_size: 0,
            listing_cache_ttl_secs: default_listing_cache_ttl_secs(),
            listing_cache_capacity: default_listing_cache_capacity(),
            compression: ArchiveCompression::default(),
        }
    }
}

impl ArchiveConfig {
    pub fn listing_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.listing_cache_ttl_secs)
    }
}

/// Thumbnail parameters for backend-side image processing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThumbConfig {
    #[serde(default = "default_thumb_width")]
    pub width: u32,
    #[serde(default = "default_thumb_height")]
    pub height: u32,
    /// Output format: "jpg", "webp" or "png".
    #[serde(default = "default_thumb_format")]
    pub format: String,
    /// Encoder quality for lossy formats (1-100).
    #[serde(default = "default_thumb_quality")]
    pub quality: u8,
}

fn default_thumb_width() -> u32 {
    400
}

fn default_thumb_height() -> u32 {
    300
}

fn default_thumb_format() -> String {
    "jpg".to_string()
}

fn default_thumb_quality() -> u8 {
    85
}

impl Default for ThumbConfig {
    fn default() -> Self {
        Self {
            width: default_thumb_width(),
            height: default_thumb_height(),
            format: default_thumb_format(),
            quality: default_thumb_quality(),
        }
    }
}

impl ThumbConfig {
    /// Check if the configured format is lossy (carries a quality parameter).
    pub fn is_lossy(&self) -> bool {
        matches!(
            self.format.to_ascii_lowercase().as_str(),
            "jpg" | "jpeg" | "webp"
        )
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage policy the driver is bound to (required).
    pub policy: StoragePolicy,
    /// Upload protocol configuration.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Archive configuration.
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Thumbnail configuration.
    #[serde(default)]
    pub thumb: ThumbConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Points at a local S3-compatible endpoint with
    /// dummy credentials.
    pub fn for_testing() -> Self {
        Self {
            policy: StoragePolicy {
                id: 1,
                name: "test".to_string(),
                kind: PolicyKind::S3,
                bucket_name: "depot-test".to_string(),
                server: Some("http://localhost:9000".to_string()),
                access_key: Some("test-access-key".to_string()),
                secret_key: Some("test-secret-key".to_string()),
                is_private: true,
                settings: PolicySettings {
                    region: Some("us-east-1".to_string()),
                    s3_force_path_style: true,
                    ..PolicySettings::default()
                },
            },
            upload: UploadConfig::default(),
            archive: ArchiveConfig::default(),
            thumb: ThumbConfig::default(),
        }
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> crate::Result<()> {
        self.policy.validate()?;
        self.upload.validate().map_err(crate::Error::Config)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::{
        Figment,
        providers::{Format, Serialized, Toml},
    };

    #[test]
    fn test_upload_config_defaults() {
        let config = UploadConfig::default();
        assert_eq!(config.default_url_ttl_secs, 604_800);
        assert_eq!(config.session_ttl(), time::Duration::days(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_upload_config_rejects_bad_site_url() {
        let config = UploadConfig {
            site_url: "localhost:5212".to_string(),
            ..UploadConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_archive_config_deserialize_partial() {
        let json = r#"{"max_archive_size": 1024, "compression": "deflate"}"#;
        let config: ArchiveConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_archive_size, 1024);
        assert_eq!(config.compression, ArchiveCompression::Deflate);
        assert_eq!(config.listing_cache_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_thumb_config_lossy_formats() {
        let mut config = ThumbConfig::default();
        assert!(config.is_lossy());
        config.format = "PNG".to_string();
        assert!(!config.is_lossy());
    }

    #[test]
    fn test_app_config_for_testing_is_valid() {
        AppConfig::for_testing().validate().unwrap();
    }

    #[test]
    fn test_app_config_from_toml_layer() {
        let toml = r#"
            [policy]
            type = "ks3"
            bucket_name = "media"
            server = "ks3-cn-beijing.ksyuncs.com"

            [policy.settings]
            chunk_size = 5242880

            [archive]
            listing_cache_ttl_secs = 60
        "#;

        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::for_testing()))
            .merge(Toml::string(toml))
            .extract()
            .unwrap();

        assert_eq!(config.policy.kind, PolicyKind::Ks3);
        assert_eq!(config.policy.bucket_name, "media");
        assert_eq!(config.policy.chunk_size(), 5 << 20);
        assert_eq!(config.archive.listing_cache_ttl_secs, 60);
        assert_eq!(config.upload.default_url_ttl_secs, 604_800);
    }
}
