//! Archive creation and listing for depot.
//!
//! This crate provides:
//! - [`ArchiveService::create_archive`], streaming filesystem entries into a zip
//! - [`ArchiveService::list_archive_files`], reading zip and 7z tables of
//!   contents through range reads, memoized in a TTL cache
//! - The [`FileSystem`] seam the service resolves paths through
//! - [`EncodingTable`], the legacy encodings accepted for entry names

pub mod cache;
pub mod create;
pub mod encoding;
pub mod error;
pub mod fs;
pub mod list;
pub mod service;

pub use cache::{ListingCache, MokaListingCache, listing_key};
pub use create::{CreateOptions, DryRunFn, ProgressFn};
pub use encoding::EncodingTable;
pub use error::{ArchiveError, ArchiveResult};
pub use fs::{FileKind, FileSystem, FsFile, ObjectFileSystem};
pub use list::{ArchiveFormat, ArchivedFile};
pub use service::ArchiveService;
