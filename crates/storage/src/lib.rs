//! Storage drivers for depot.
//!
//! This crate provides:
//! - The [`StorageDriver`] contract every backend implements
//! - The [`ObjectApi`] seam over remote object storage, with an
//!   S3-compatible implementation
//! - [`RemoteDriver`], the reference chunked presigned-upload driver
//! - [`EntitySource`] random-access readers over stored entities

pub mod api;
pub mod backends;
pub mod driver;
pub mod entity_source;
pub mod error;
pub mod remote;

pub use api::{ObjectApi, ObjectApiExt, ObjectMeta, PresignMethod, PresignRequest};
pub use backends::S3ObjectApi;
pub use driver::{
    Capabilities, DeleteOutcome, PhysicalObject, SourceArgs, StorageDriver, UploadProps,
    UploadRequest,
};
pub use entity_source::{BlockingRangeReader, EntitySource, RangeEntitySource};
pub use error::{StorageError, StorageResult};
pub use remote::RemoteDriver;

use depot_core::config::AppConfig;
use std::sync::Arc;

/// Create the driver for the configured storage policy.
pub fn driver_from_config(config: &AppConfig) -> StorageResult<Arc<dyn StorageDriver>> {
    config.validate()?;

    let api = S3ObjectApi::from_policy(&config.policy)?;
    let driver = RemoteDriver::new(
        config.policy.clone(),
        Arc::new(api),
        config.upload.clone(),
        config.thumb.clone(),
    );
    Ok(Arc::new(driver))
}
