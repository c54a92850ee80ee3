//! Storage policies and backend capability flags.

use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_DELETE_BATCH_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend kind a policy is bound to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Generic S3-compatible object storage.
    #[default]
    S3,
    /// Kingsoft KS3 (S3-compatible with image processing suffixes).
    Ks3,
}

impl PolicyKind {
    /// Get the kind as a stable lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Ks3 => "ks3",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A static feature a driver may advertise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Capability {
    /// Completed uploads must be confirmed by an out-of-band sentinel task.
    UploadSentinelRequired = 0,
    /// The backend can enumerate objects under a prefix.
    ListSupported = 1,
    /// The backend serves byte ranges of stored objects.
    RangeReadSupported = 2,
}

impl Capability {
    /// Every capability, in bit order.
    pub const ALL: [Capability; 3] = [
        Capability::UploadSentinelRequired,
        Capability::ListSupported,
        Capability::RangeReadSupported,
    ];

    const fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

/// Fixed-size bitmask over [`Capability`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u32);

impl CapabilitySet {
    /// An empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Return a copy of this set with `cap` enabled.
    pub const fn with(self, cap: Capability) -> Self {
        Self(self.0 | cap.bit())
    }

    /// Check whether `cap` is enabled.
    pub fn get(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    /// Enable or disable `cap`.
    pub fn set(&mut self, cap: Capability, enabled: bool) {
        if enabled {
            self.0 |= cap.bit();
        } else {
            self.0 &= !cap.bit();
        }
    }

    /// Iterate over enabled capabilities.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|cap| self.get(*cap))
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Backend-specific policy settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PolicySettings {
    /// Chunk size in bytes for chunked uploads (0 = driver default).
    #[serde(default)]
    pub chunk_size: u64,
    /// Backend region.
    #[serde(default)]
    pub region: Option<String>,
    /// Use path-style addressing (`endpoint/bucket/key`).
    #[serde(default)]
    pub s3_force_path_style: bool,
    /// Maximum keys per batched delete (0 = 1000).
    #[serde(default)]
    pub s3_delete_batch_size: usize,
    /// Generate thumbnails through the backend's image pipeline.
    #[serde(default)]
    pub thumb_generator_proxy: bool,
    /// Extract media metadata through the backend.
    #[serde(default)]
    pub media_meta_generator_proxy: bool,
}

/// A storage policy: which backend, which bucket, and how to talk to it.
///
/// Policies are immutable for the lifetime of an upload.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoragePolicy {
    /// Policy identifier.
    #[serde(default)]
    pub id: i64,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Backend kind.
    #[serde(rename = "type", default)]
    pub kind: PolicyKind,
    /// Bucket name.
    pub bucket_name: String,
    /// Endpoint URL; bare `host:port` is accepted.
    #[serde(default)]
    pub server: Option<String>,
    /// Access key ID.
    /// WARNING: Prefer DEPOT_POLICY__ACCESS_KEY over storing secrets in config files.
    #[serde(default)]
    pub access_key: Option<String>,
    /// Secret access key.
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Private buckets keep signatures on issued URLs; public buckets strip them.
    #[serde(default)]
    pub is_private: bool,
    /// Backend-specific settings.
    #[serde(default)]
    pub settings: PolicySettings,
}

impl fmt::Debug for StoragePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoragePolicy")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("bucket_name", &self.bucket_name)
            .field("server", &self.server)
            .field("is_private", &self.is_private)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl StoragePolicy {
    /// Chunk size used for uploads under this policy.
    pub fn chunk_size(&self) -> u64 {
        if self.settings.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.settings.chunk_size
        }
    }

    /// Maximum number of keys per batched delete.
    pub fn delete_batch_size(&self) -> usize {
        if self.settings.s3_delete_batch_size == 0 {
            DEFAULT_DELETE_BATCH_SIZE
        } else {
            self.settings.s3_delete_batch_size
        }
    }

    /// Validate policy invariants.
    pub fn validate(&self) -> crate::Result<()> {
        if self.bucket_name.trim().is_empty() {
            return Err(crate::Error::InvalidPolicy(
                "bucket_name must not be empty".to_string(),
            ));
        }

        if self.access_key.is_some() ^ self.secret_key.is_some() {
            return Err(crate::Error::InvalidPolicy(
                "policy requires both access_key and secret_key when either is set".to_string(),
            ));
        }

        Ok(())
    }
}
