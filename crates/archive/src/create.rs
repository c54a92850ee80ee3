//! Zip archive creation.

use crate::error::{ArchiveError, ArchiveResult};
use crate::fs::{FileKind, FsFile};
use crate::service::ArchiveService;
use depot_core::Entity;
use depot_core::config::{ArchiveCompression, ArchiveConfig};
use depot_storage::EntitySource;
use std::io::{self, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Bytes pulled from an entity per range read.
const COPY_WINDOW: u64 = 1 << 20;

/// Called after each file with `(bytes_so_far, file_size, reserved)`.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, u64, u64) + Send + Sync);

/// Called instead of writing, with the entry name and its source entity.
pub type DryRunFn<'a> = &'a (dyn Fn(&str, &Entity) + Send + Sync);

/// Options of one archive run.
#[derive(Clone, Copy, Default)]
pub struct CreateOptions<'a> {
    pub compression: ArchiveCompression,
    /// Abort once the summed size of source files exceeds this (0 = unlimited).
    pub max_archive_size: u64,
    pub progress: Option<ProgressFn<'a>>,
    /// Report entries without writing anything.
    pub dry_run: Option<DryRunFn<'a>>,
}

impl CreateOptions<'_> {
    pub fn from_config(config: &ArchiveConfig) -> Self {
        Self {
            compression: config.compression,
            max_archive_size: config.max_archive_size,
            ..Self::default()
        }
    }
}

/// Writer that fails every call once the run is abandoned, so the zip
/// encoder cannot write a central directory when dropped.
struct AbortableWriter<W> {
    inner: W,
    aborted: Arc<AtomicBool>,
}

impl<W> AbortableWriter<W> {
    fn check(&self) -> io::Result<()> {
        if self.aborted.load(Ordering::Acquire) {
            return Err(io::Error::other("archive aborted"));
        }
        Ok(())
    }
}

impl<W: Write> Write for AbortableWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check()?;
        self.inner.flush()
    }
}

impl<W: Seek> Seek for AbortableWriter<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.check()?;
        self.inner.seek(pos)
    }
}

/// State of one archive run.
struct Run<'o, 'a, W: Write + Seek> {
    /// `None` in dry-run mode.
    zip: Option<ZipWriter<AbortableWriter<W>>>,
    options: &'o CreateOptions<'a>,
    method: CompressionMethod,
    /// Summed size of every visited source file.
    total: u64,
    failed: usize,
}

/// Archive path of a file: its parent made relative to `prefix`, joined
/// with its name.
fn entry_name(parent: &str, prefix: &str, name: &str) -> String {
    let relative = parent
        .strip_prefix(prefix)
        .unwrap_or(parent)
        .trim_matches('/');
    if relative.is_empty() {
        name.to_string()
    } else {
        format!("{relative}/{name}")
    }
}

fn zip_datetime(t: OffsetDateTime) -> Option<zip::DateTime> {
    let t = t.to_offset(time::UtcOffset::UTC);
    zip::DateTime::from_date_and_time(
        u16::try_from(t.year()).ok()?,
        u8::from(t.month()),
        t.day(),
        t.hour(),
        t.minute(),
        t.second(),
    )
    .ok()
}

impl ArchiveService {
    /// Write the files under `roots` into a zip archive on `writer`.
    ///
    /// Files that fail to read are skipped and counted; the count is
    /// returned once the archive is finished. Exceeding
    /// `max_archive_size` or cancellation abandons the archive.
    #[instrument(skip(self, roots, writer, options), fields(roots = roots.len()))]
    pub async fn create_archive<W>(
        &self,
        roots: &[String],
        writer: W,
        options: &CreateOptions<'_>,
    ) -> ArchiveResult<usize>
    where
        W: Write + Seek,
    {
        let mut sources = Vec::with_capacity(roots.len());
        for root in roots {
            let file = self.fs.get(root).await?;
            if file.is_root() {
                return Err(ArchiveError::InvalidArchiveRoot(root.clone()));
            }
            sources.push(file);
        }

        let aborted = Arc::new(AtomicBool::new(false));
        let zip = options.dry_run.is_none().then(|| {
            ZipWriter::new(AbortableWriter {
                inner: writer,
                aborted: aborted.clone(),
            })
        });
        let mut run = Run {
            zip,
            options,
            method: match options.compression {
                ArchiveCompression::Store => CompressionMethod::Stored,
                ArchiveCompression::Deflate => CompressionMethod::Deflated,
            },
            total: 0,
            failed: 0,
        };

        let result = self.archive_sources(&mut run, &sources).await;
        if let Err(e) = result {
            aborted.store(true, Ordering::Release);
            return Err(e);
        }

        if let Some(zip) = run.zip.take() {
            zip.finish()?;
        }
        Ok(run.failed)
    }

    async fn archive_sources<W: Write + Seek>(
        &self,
        run: &mut Run<'_, '_, W>,
        sources: &[FsFile],
    ) -> ArchiveResult<()> {
        for source in sources {
            if source.is_file() {
                self.add_file(run, "", "", source).await?;
            } else {
                self.add_folder(run, source).await?;
            }
        }
        Ok(())
    }

    /// Depth-first walk of `root`, skipping symbolic links.
    async fn add_folder<W: Write + Seek>(
        &self,
        run: &mut Run<'_, '_, W>,
        root: &FsFile,
    ) -> ArchiveResult<()> {
        let prefix = root.parent();
        let mut pending = vec![root.path.clone()];

        while let Some(dir) = pending.pop() {
            self.check_cancelled()?;
            let children = match self.fs.children(&dir).await {
                Ok(children) => children,
                Err(e) => {
                    warn!(path = %dir, error = %e, "Failed to walk folder, skipping it");
                    run.failed += 1;
                    continue;
                }
            };

            let mut folders = Vec::new();
            for child in children.iter().filter(|c| !c.is_symbolic) {
                match child.kind {
                    FileKind::Folder => folders.push(child.path.clone()),
                    FileKind::File => self.add_file(run, child.parent(), prefix, child).await?,
                }
            }
            // Reversed so subfolders are visited in listing order
            pending.extend(folders.into_iter().rev());
        }
        Ok(())
    }

    async fn add_file<W: Write + Seek>(
        &self,
        run: &mut Run<'_, '_, W>,
        parent: &str,
        prefix: &str,
        file: &FsFile,
    ) -> ArchiveResult<()> {
        self.check_cancelled()?;
        let name = entry_name(parent, prefix, file.name());

        match self.write_entry(run, &name, file).await {
            Ok(()) => {}
            Err(ArchiveError::Cancelled) => return Err(ArchiveError::Cancelled),
            Err(e) => {
                warn!(path = %file.path, error = %e, "Failed to compress file, skipping it");
                run.failed += 1;
            }
        }

        run.total += file.size;
        if let Some(progress) = run.options.progress {
            progress(run.total, file.size, 0);
        }

        let limit = run.options.max_archive_size;
        if limit > 0 && run.total > limit {
            return Err(ArchiveError::SizeExceeded { limit });
        }
        Ok(())
    }

    async fn write_entry<W: Write + Seek>(
        &self,
        run: &mut Run<'_, '_, W>,
        name: &str,
        file: &FsFile,
    ) -> ArchiveResult<()> {
        let entity = file
            .find_entity(None)
            .ok_or_else(|| ArchiveError::EntityNotFound(file.path.clone()))?;
        let mut source = self.fs.open_entity(entity).await?;

        if let Some(dry_run) = run.options.dry_run {
            dry_run(name, source.entity());
            return Ok(());
        }
        let Some(zip) = run.zip.as_mut() else {
            return Ok(());
        };

        debug!(path = %file.path, entry = %name, "Compressing file to archive");
        let mut options = SimpleFileOptions::default()
            .compression_method(run.method)
            .large_file(source.size() >= u64::from(u32::MAX));
        if let Some(modified) = zip_datetime(file.updated_at) {
            options = options.last_modified_time(modified);
        }

        zip.start_file(name, options)?;
        let copied = self.copy_entity(source.as_mut(), &mut *zip).await;
        if copied.is_err() {
            zip.abort_file()?;
        }
        copied
    }

    async fn copy_entity<W: Write>(
        &self,
        source: &mut dyn EntitySource,
        out: &mut W,
    ) -> ArchiveResult<()> {
        let size = source.size();
        let mut pos = 0;
        while pos < size {
            self.check_cancelled()?;
            let end = (pos + COPY_WINDOW).min(size);
            let bytes = source.read_range(pos, end).await?;
            if bytes.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("entity ended at {pos} of {size} bytes"),
                )
                .into());
            }
            out.write_all(&bytes)?;
            pos += bytes.len() as u64;
        }
        Ok(())
    }
}
