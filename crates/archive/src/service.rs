//! Archive service wiring.

use crate::cache::{ListingCache, MokaListingCache};
use crate::encoding::EncodingTable;
use crate::error::{ArchiveError, ArchiveResult};
use crate::fs::FileSystem;
use depot_core::config::ArchiveConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Creates zip archives from filesystem entries and lists the contents of
/// stored zip and 7z archives.
///
/// Bytes are always pulled through entity range readers opened from the
/// [`FileSystem`]; nothing is assumed to be local.
pub struct ArchiveService {
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) cache: Arc<dyn ListingCache>,
    pub(crate) encodings: Arc<EncodingTable>,
    pub(crate) config: ArchiveConfig,
    pub(crate) cancel: CancellationToken,
}

impl ArchiveService {
    /// Service with an in-memory listing cache and every known encoding.
    pub fn new(fs: Arc<dyn FileSystem>, config: ArchiveConfig) -> Self {
        let cache = MokaListingCache::new(
            config.listing_cache_capacity,
            config.listing_cache_ttl(),
        );
        Self {
            fs,
            cache: Arc::new(cache),
            encodings: Arc::new(EncodingTable::default()),
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ListingCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Restrict or extend the encodings accepted for entry names.
    pub fn with_encodings(mut self, encodings: EncodingTable) -> Self {
        self.encodings = Arc::new(encodings);
        self
    }

    /// Abort archive streaming and listing with [`ArchiveError::Cancelled`]
    /// once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn encodings(&self) -> &EncodingTable {
        &self.encodings
    }

    pub(crate) fn check_cancelled(&self) -> ArchiveResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ArchiveService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveService")
            .field("config", &self.config)
            .field("encodings", &self.encodings.len())
            .finish_non_exhaustive()
    }
}
