//! Chunk planning for multipart transfers.
//!
//! A [`ChunkPlanner`] splits a total size into fixed-size chunks and walks
//! them with a cursor. Work on each chunk is driven through
//! [`ChunkPlanner::process`], which retries the current chunk on transient
//! failures according to a [`Backoff`] policy.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// One chunk of a planned transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// Zero-based chunk index.
    pub index: u64,
    /// Inclusive start offset.
    pub start: u64,
    /// Exclusive end offset.
    pub end: u64,
}

impl ChunkDescriptor {
    /// Length of this chunk in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Check if the chunk carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// One-based part number used by multipart backends.
    pub fn part_number(&self) -> i32 {
        i32::try_from(self.index + 1).unwrap_or(i32::MAX)
    }
}

/// Errors that may succeed on a retry.
pub trait Transient {
    /// Whether retrying the same operation could succeed.
    fn is_transient(&self) -> bool;
}

/// Retry policy for chunk processing.
pub trait Backoff: Send + Sync {
    /// Delay before retry number `attempt` (1-based), or `None` to give up.
    fn delay(&self, attempt: u32) -> Option<Duration>;
}

/// Never retry.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBackoff;

impl Backoff for NoBackoff {
    fn delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Retry up to `max_retries` times with a fixed sleep between attempts.
#[derive(Clone, Copy, Debug)]
pub struct ConstantBackoff {
    pub sleep: Duration,
    pub max_retries: u32,
}

impl ConstantBackoff {
    pub fn new(sleep: Duration, max_retries: u32) -> Self {
        Self { sleep, max_retries }
    }
}

impl Backoff for ConstantBackoff {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        (attempt <= self.max_retries).then_some(self.sleep)
    }
}

/// Cursor over the chunks of a transfer.
///
/// The cursor starts before the first chunk; `next`
/// moves it forward. An empty transfer has zero chunks and `next`
/// returns `None` immediately.
#[derive(Clone)]
pub struct ChunkPlanner {
    total: u64,
    chunk_size: u64,
    count: u64,
    /// Index of the next chunk `next` will yield.
    next: u64,
    backoff: Arc<dyn Backoff>,
}

impl std::fmt::Debug for ChunkPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkPlanner")
            .field("total", &self.total)
            .field("chunk_size", &self.chunk_size)
            .field("count", &self.count)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

impl ChunkPlanner {
    /// Plan `total` bytes in chunks of `chunk_size`.
    pub fn new(total: u64, chunk_size: u64, backoff: Arc<dyn Backoff>) -> crate::Result<Self> {
        if chunk_size == 0 {
            return Err(crate::Error::InvalidChunkSize(chunk_size));
        }
        Ok(Self {
            total,
            chunk_size,
            count: total.div_ceil(chunk_size),
            next: 0,
            backoff,
        })
    }

    /// Plan without retries.
    pub fn without_retry(total: u64, chunk_size: u64) -> crate::Result<Self> {
        Self::new(total, chunk_size, Arc::new(NoBackoff))
    }

    /// Total number of chunks.
    pub fn chunk_count(&self) -> u64 {
        self.count
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Descriptor of chunk `index`.
    pub fn descriptor(&self, index: u64) -> crate::Result<ChunkDescriptor> {
        if index >= self.count {
            return Err(crate::Error::ChunkOutOfRange {
                index,
                count: self.count,
            });
        }
        // index < count, so start < total
        let start = index * self.chunk_size;
        let end = start.saturating_add(self.chunk_size).min(self.total);
        Ok(ChunkDescriptor { index, start, end })
    }

    /// All descriptors in order.
    pub fn descriptors(&self) -> impl Iterator<Item = ChunkDescriptor> + '_ {
        (0..self.count).filter_map(|index| self.descriptor(index).ok())
    }

    /// Index of the chunk the cursor is on, if `next` was called.
    pub fn index(&self) -> Option<u64> {
        if self.next == 0 || self.next > self.count {
            None
        } else {
            Some(self.next - 1)
        }
    }

    /// Descriptor of the chunk the cursor is on.
    pub fn current(&self) -> Option<ChunkDescriptor> {
        self.index().and_then(|index| self.descriptor(index).ok())
    }

    /// Rewind to before the first chunk.
    pub fn reset(&mut self) {
        self.next = 0;
    }

    /// Position the cursor so the next call to `next` yields chunk `index`.
    pub fn resume_at(&mut self, index: u64) -> crate::Result<()> {
        if index > self.count {
            return Err(crate::Error::ChunkOutOfRange {
                index,
                count: self.count,
            });
        }
        self.next = index;
        Ok(())
    }

    /// Run `f` on the current chunk, retrying transient failures.
    ///
    /// `f` is called again for the same chunk while the error is transient
    /// and the backoff policy allows another attempt.
    pub async fn process<T, E, F, Fut>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut(ChunkDescriptor) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + std::fmt::Display,
    {
        // Before the first `next`, or for an empty plan, run on an empty chunk 0.
        let chunk = self.current().unwrap_or(ChunkDescriptor {
            index: 0,
            start: 0,
            end: 0,
        });

        let mut attempt = 0u32;
        loop {
            match f(chunk).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    let Some(delay) = self.backoff.delay(attempt) else {
                        return Err(e);
                    };
                    warn!(
                        chunk = chunk.index,
                        attempt,
                        error = %e,
                        "Chunk failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Iterator for ChunkPlanner {
    type Item = ChunkDescriptor;

    /// Move to the next chunk. Returns `None` once every chunk was visited.
    fn next(&mut self) -> Option<ChunkDescriptor> {
        let descriptor = self.descriptor(self.next).ok()?;
        self.next += 1;
        Some(descriptor)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining =
            usize::try_from(self.count.saturating_sub(self.next)).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}
