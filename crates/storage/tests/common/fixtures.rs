use bytes::Bytes;
use depot_core::config::{ThumbConfig, UploadConfig};
use depot_core::{PolicyKind, PolicySettings, StoragePolicy};
use depot_storage::RemoteDriver;
use std::sync::Arc;

use super::mocks::MemoryObjectApi;

/// A private KS3 policy with small chunks.
pub fn policy() -> StoragePolicy {
    StoragePolicy {
        id: 7,
        name: "memory".to_string(),
        kind: PolicyKind::Ks3,
        bucket_name: "bucket".to_string(),
        server: None,
        access_key: Some("ak".to_string()),
        secret_key: Some("sk".to_string()),
        is_private: true,
        settings: PolicySettings {
            chunk_size: 5,
            ..PolicySettings::default()
        },
    }
}

/// Upload configuration with instant retries.
pub fn upload_config() -> UploadConfig {
    UploadConfig {
        chunk_retries: 3,
        chunk_retry_delay_ms: 0,
        site_url: "https://depot.example.com/".to_string(),
        ..UploadConfig::default()
    }
}

/// Driver over a fresh in-memory API with the default test policy.
pub fn driver() -> (RemoteDriver, Arc<MemoryObjectApi>) {
    driver_with(policy(), MemoryObjectApi::new())
}

pub fn driver_with(
    policy: StoragePolicy,
    api: MemoryObjectApi,
) -> (RemoteDriver, Arc<MemoryObjectApi>) {
    let api = Arc::new(api);
    let driver = RemoteDriver::new(policy, api.clone(), upload_config(), ThumbConfig::default());
    (driver, api)
}

/// Generate deterministic test data using a seeded pseudo-random generator
/// Same seed produces same output (reproducible tests)
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        assert_eq!(seeded_bytes(42, 1000), seeded_bytes(42, 1000));
        assert_ne!(seeded_bytes(42, 1000), seeded_bytes(43, 1000));
    }
}
