//! Core domain types shared by the depot crates.
//!
//! This crate defines the data model the storage drivers and the archive
//! service agree on:
//! - Storage policies and their capability flags
//! - Upload sessions and the credentials issued for chunked uploads
//! - Chunk planning with a per-chunk retry policy
//! - Stored entities (one addressable content version of a file)
//! - Application configuration

pub mod chunk;
pub mod config;
pub mod entity;
pub mod error;
pub mod policy;
pub mod upload;

pub use chunk::{Backoff, ChunkDescriptor, ChunkPlanner, ConstantBackoff, NoBackoff, Transient};
pub use entity::{Entity, EntityId};
pub use error::{Error, Result};
pub use policy::{Capability, CapabilitySet, PolicyKind, PolicySettings, StoragePolicy};
pub use upload::{UploadCredential, UploadSession, UploadSessionId, UploadState};

/// Default chunk size when a policy does not set one: 25 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 25 << 20;

/// Default lifetime of presigned source/thumbnail URLs: 7 days.
pub const DEFAULT_URL_TTL_SECS: u64 = 604_800;

/// Maximum number of keys in one batched delete request.
pub const DEFAULT_DELETE_BATCH_SIZE: usize = 1000;

/// Default time-to-live of cached archive listings: 1 hour.
pub const ARCHIVE_LIST_CACHE_TTL_SECS: u64 = 3600;
