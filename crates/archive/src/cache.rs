//! TTL cache for archive listings.

use crate::ArchivedFile;
use async_trait::async_trait;
use depot_core::EntityId;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// A decoded archive listing, shared between cache and callers.
pub type Listing = Arc<Vec<ArchivedFile>>;

/// Key-value store memoizing archive listings.
///
/// Concurrent misses on one key may both decode; the last insert wins.
#[async_trait]
pub trait ListingCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Listing>;

    async fn insert(&self, key: String, listing: Listing);
}

/// Cache key of the listing of `entity` decoded with `encoding`.
///
/// Keys are derived from content identity only, so a new entity version
/// never hits a stale entry.
pub fn listing_key(entity: EntityId, encoding: &str) -> String {
    format!("archive_list_{entity}_{}", encoding.to_ascii_lowercase())
}

/// In-memory [`ListingCache`] with a fixed time-to-live.
#[derive(Clone)]
pub struct MokaListingCache {
    cache: Cache<String, Listing>,
}

impl MokaListingCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Number of live entries, after pending maintenance has run.
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

#[async_trait]
impl ListingCache for MokaListingCache {
    async fn get(&self, key: &str) -> Option<Listing> {
        self.cache.get(key).await
    }

    async fn insert(&self, key: String, listing: Listing) {
        self.cache.insert(key, listing).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(name: &str) -> Listing {
        Arc::new(vec![ArchivedFile {
            name: name.to_string(),
            size: 1,
            updated_at: None,
            is_directory: false,
        }])
    }

    #[test]
    fn test_listing_key() {
        assert_eq!(listing_key(42, ""), "archive_list_42_");
        assert_eq!(listing_key(42, "GBK"), "archive_list_42_gbk");
        assert_ne!(listing_key(42, "gbk"), listing_key(43, "gbk"));
    }

    #[tokio::test]
    async fn test_get_and_insert() {
        let cache = MokaListingCache::new(16, Duration::from_secs(60));
        assert!(cache.get("k").await.is_none());

        cache.insert("k".to_string(), listing("a.txt")).await;
        let hit = cache.get("k").await.unwrap();
        assert_eq!(hit[0].name, "a.txt");
        assert_eq!(cache.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = MokaListingCache::new(16, Duration::from_millis(100));
        cache.insert("k".to_string(), listing("a.txt")).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(cache.get("k").await.is_none());
    }
}
