// Archive listing, caching and precondition checks

mod common;

use common::{FOLDERS_7Z, LEGACY_ZIP, MemoryFileSystem};
use depot_archive::{ArchiveError, ArchiveService, EncodingTable, MokaListingCache};
use depot_core::config::ArchiveConfig;
use std::sync::Arc;
use std::time::Duration;
use time::macros::datetime;
use tokio_util::sync::CancellationToken;

fn service(fs: &Arc<MemoryFileSystem>) -> ArchiveService {
    ArchiveService::new(fs.clone(), ArchiveConfig::default())
}

fn with_zip() -> Arc<MemoryFileSystem> {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.add_file("/downloads/legacy.zip", LEGACY_ZIP);
    fs
}

#[tokio::test(flavor = "multi_thread")]
async fn test_list_zip_entries() {
    let fs = with_zip();

    let files = service(&fs)
        .list_archive_files("/downloads/legacy.zip", None, None)
        .await
        .unwrap();

    assert_eq!(files.len(), 4);
    assert_eq!(files[0].name, "docs/");
    assert!(files[0].is_directory);
    assert_eq!(files[1].name, "docs/readme.txt");
    assert_eq!(files[1].size, 5);
    assert!(!files[1].is_directory);
    assert_eq!(
        files[1].updated_at,
        Some(datetime!(2024-03-05 10:20:30 UTC))
    );
    assert_eq!(files[3].name, "utf8/名前.txt");

    // Without an encoding the legacy name keeps its raw bytes
    let raw = [0xCE, 0xC4, 0xB5, 0xB5, b'.', b't', b'x', b't'];
    assert_eq!(files[2].name, String::from_utf8_lossy(&raw));
    assert_eq!(files[2].name, "\u{FFFD}\u{135}\u{FFFD}.txt");
    assert_eq!(files[2].size, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_list_zip_with_legacy_encoding() {
    let fs = with_zip();

    let files = service(&fs)
        .list_archive_files("/downloads/legacy.zip", None, Some("GBK"))
        .await
        .unwrap();

    assert_eq!(files[2].name, "文档.txt");
    // Names flagged as UTF-8 are untouched
    assert_eq!(files[3].name, "utf8/名前.txt");
    assert_eq!(files[1].name, "docs/readme.txt");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_list_7z_entries() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.add_file("/folders.7z", FOLDERS_7Z);

    let files = service(&fs)
        .list_archive_files("/folders.7z", None, None)
        .await
        .unwrap();

    assert_eq!(files.len(), 2);
    assert_eq!(files[0].name, "docs");
    assert!(files[0].is_directory);
    assert_eq!(files[1].name, "docs/empty.txt");
    assert!(!files[1].is_directory);
    assert_eq!(files[1].size, 0);
    assert_eq!(files[1].updated_at, Some(datetime!(2024-01-01 0:00 UTC)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_listing_is_cached_per_entity_and_encoding() {
    let fs = with_zip();
    let service = service(&fs);
    let uri = "/downloads/legacy.zip";

    let first = service.list_archive_files(uri, None, None).await.unwrap();
    let second = service.list_archive_files(uri, None, None).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(fs.opened(), 1);

    service.list_archive_files(uri, None, Some("gbk")).await.unwrap();
    assert_eq!(fs.opened(), 2);
    // Encoding names are case-insensitive, including in cache keys
    service.list_archive_files(uri, None, Some("GbK")).await.unwrap();
    assert_eq!(fs.opened(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_new_version_misses_cache() {
    let fs = with_zip();
    let service = service(&fs);
    let uri = "/downloads/legacy.zip";

    let old = service.list_archive_files(uri, None, None).await.unwrap();
    let newer = fs.add_version(uri, FOLDERS_7Z);
    assert_eq!(fs.opened(), 1);

    // The new primary entity holds 7z bytes under a .zip name
    let err = service.list_archive_files(uri, None, None).await.unwrap_err();
    assert!(matches!(err, ArchiveError::Zip(_)));
    assert_eq!(fs.opened(), 2);

    // The previous version is still served from cache
    let previous = newer.id - 1;
    let again = service
        .list_archive_files(uri, Some(previous), None)
        .await
        .unwrap();
    assert_eq!(again, old);
    assert_eq!(fs.opened(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cache_entries_expire() {
    let fs = with_zip();
    let cache = MokaListingCache::new(16, Duration::from_millis(100));
    let service = service(&fs).with_cache(Arc::new(cache));
    let uri = "/downloads/legacy.zip";

    service.list_archive_files(uri, None, None).await.unwrap();
    service.list_archive_files(uri, None, None).await.unwrap();
    assert_eq!(fs.opened(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    service.list_archive_files(uri, None, None).await.unwrap();
    assert_eq!(fs.opened(), 2);
}

#[tokio::test]
async fn test_folder_is_not_supported() {
    let fs = with_zip();

    let err = service(&fs)
        .list_archive_files("/downloads", None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::NotSupported(_)));
    assert!(err.is_precondition());
}

#[tokio::test]
async fn test_source_over_decompress_limit() {
    let fs = with_zip();
    let config = ArchiveConfig {
        max_decompress_size: 100,
        ..ArchiveConfig::default()
    };
    let service = ArchiveService::new(fs.clone(), config);

    let err = service
        .list_archive_files("/downloads/legacy.zip", None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::SourceTooLarge { limit: 100, .. }));
    assert_eq!(fs.opened(), 0);
}

#[tokio::test]
async fn test_unknown_entity() {
    let fs = with_zip();

    let err = service(&fs)
        .list_archive_files("/downloads/legacy.zip", Some(999), None)
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::EntityNotFound(_)));
}

#[tokio::test]
async fn test_unsupported_encoding() {
    let fs = with_zip();

    let err = service(&fs)
        .list_archive_files("/downloads/legacy.zip", None, Some("klingon"))
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::UnsupportedEncoding(ref name) if name == "klingon"));

    // A reduced table rejects everything it does not carry
    let reduced = service(&fs).with_encodings(EncodingTable::empty().with("gbk", encoding_rs::GBK));
    let err = reduced
        .list_archive_files("/downloads/legacy.zip", None, Some("big5"))
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::UnsupportedEncoding(_)));
    assert_eq!(fs.opened(), 0);
}

#[tokio::test]
async fn test_unsupported_format() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.add_file("/a/backup.rar", "Rar!");

    let err = service(&fs)
        .list_archive_files("/a/backup.rar", None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::UnsupportedFormat(ref ext) if ext == "rar"));
    assert_eq!(fs.opened(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_corrupt_archive() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.add_file("/bad.zip", "definitely not a zip file");
    fs.add_file("/bad.7z", "nor a 7z one");

    let service = service(&fs);
    assert!(matches!(
        service.list_archive_files("/bad.zip", None, None).await,
        Err(ArchiveError::Zip(_))
    ));
    assert!(matches!(
        service.list_archive_files("/bad.7z", None, None).await,
        Err(ArchiveError::SevenZip(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_reads_are_not_cached() {
    let fs = with_zip();
    fs.break_reads("/downloads/legacy.zip");
    let service = service(&fs);

    assert!(
        service
            .list_archive_files("/downloads/legacy.zip", None, None)
            .await
            .is_err()
    );
    assert!(
        service
            .list_archive_files("/downloads/legacy.zip", None, None)
            .await
            .is_err()
    );
    assert_eq!(fs.opened(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_listing() {
    let fs = with_zip();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let service = service(&fs).with_cancellation(cancel);

    let err = service
        .list_archive_files("/downloads/legacy.zip", None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::Cancelled));
}
