//! Random-access readers over stored entities.

use crate::api::ObjectApi;
use crate::error::{StorageError, StorageResult};
use crate::remote::bounded;
use async_trait::async_trait;
use bytes::Bytes;
use depot_core::Entity;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Read-ahead window of [`BlockingRangeReader`].
const READ_WINDOW: usize = 64 * 1024;

/// Random-access reader over one entity's bytes.
///
/// Owned by a single consumer and released when dropped.
#[async_trait]
pub trait EntitySource: Send {
    /// The entity being read.
    fn entity(&self) -> &Entity;

    /// Read bytes `[start, end)`, clamped to the entity size.
    async fn read_range(&mut self, start: u64, end: u64) -> StorageResult<Bytes>;

    /// Entity size in bytes.
    fn size(&self) -> u64 {
        self.entity().size
    }
}

/// [`EntitySource`] backed by ranged GETs against an [`ObjectApi`].
///
/// Each read is bounded by `timeout` and aborted once `cancel` fires.
pub struct RangeEntitySource {
    api: Arc<dyn ObjectApi>,
    entity: Entity,
    timeout: Duration,
    cancel: CancellationToken,
}

impl RangeEntitySource {
    pub fn new(
        api: Arc<dyn ObjectApi>,
        entity: Entity,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            entity,
            timeout,
            cancel,
        }
    }
}

#[async_trait]
impl EntitySource for RangeEntitySource {
    fn entity(&self) -> &Entity {
        &self.entity
    }

    async fn read_range(&mut self, start: u64, end: u64) -> StorageResult<Bytes> {
        let end = end.min(self.entity.size);
        if start >= end {
            return Ok(Bytes::new());
        }
        bounded(
            "get_range",
            self.timeout,
            &self.cancel,
            self.api.get_range(&self.entity.source, start, end),
        )
        .await
    }
}

/// Synchronous `Read + Seek` adapter over an [`EntitySource`].
///
/// Decoders that need `std::io` traits run on a blocking thread
/// (`tokio::task::spawn_blocking`) and pull ranges through this adapter.
/// Calling it from an async worker thread panics.
pub struct BlockingRangeReader {
    source: Box<dyn EntitySource>,
    handle: Handle,
    pos: u64,
    size: u64,
    buffer: Bytes,
    /// Offset of `buffer[0]` in the entity.
    buffer_start: u64,
    cancel: Option<CancellationToken>,
}

impl BlockingRangeReader {
    pub fn new(source: Box<dyn EntitySource>, handle: Handle) -> Self {
        let size = source.size();
        Self {
            source,
            handle,
            pos: 0,
            size,
            buffer: Bytes::new(),
            buffer_start: 0,
            cancel: None,
        }
    }

    /// Fail reads with a wrapped [`StorageError::Cancelled`] once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn buffered(&self) -> Option<&[u8]> {
        let buffer_end = self.buffer_start + self.buffer.len() as u64;
        if self.pos >= self.buffer_start && self.pos < buffer_end {
            let offset = (self.pos - self.buffer_start) as usize;
            Some(&self.buffer[offset..])
        } else {
            None
        }
    }

    fn fill(&mut self, want: usize) -> io::Result<()> {
        if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(io::Error::other(StorageError::Cancelled));
        }
        let start = self.pos;
        let end = start.saturating_add(want.max(READ_WINDOW) as u64).min(self.size);
        let source = &mut self.source;
        let bytes = self
            .handle
            .block_on(source.read_range(start, end))
            .map_err(io::Error::other)?;
        self.buffer = bytes;
        self.buffer_start = start;
        Ok(())
    }
}

impl Read for BlockingRangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.size {
            return Ok(0);
        }
        if self.buffered().is_none() {
            self.fill(buf.len())?;
        }
        let Some(available) = self.buffered() else {
            // Backend returned fewer bytes than the entity size claims.
            return Ok(0);
        };
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for BlockingRangeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of entity")
        })?;
        self.pos = target;
        Ok(target)
    }
}
