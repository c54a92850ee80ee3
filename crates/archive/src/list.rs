//! Zip and 7z table-of-contents listing.

use crate::cache::{Listing, listing_key};
use crate::encoding::decode;
use crate::error::{ArchiveError, ArchiveResult};
use crate::service::ArchiveService;
use depot_core::EntityId;
use depot_storage::{BlockingRangeReader, EntitySource};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek};
use std::sync::Arc;
use time::{Month, OffsetDateTime};
use tokio::runtime::Handle;
use tracing::{debug, instrument};
use zip::ZipArchive;

/// 100 ns ticks between 1601-01-01 and the Unix epoch.
const NT_TICKS_TO_UNIX_EPOCH: i128 = 116_444_736_000_000_000;

/// One entry of an archive's table of contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedFile {
    /// Entry path with `/` separators.
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
    pub is_directory: bool,
}

/// Archive formats that can be listed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    SevenZip,
}

impl ArchiveFormat {
    /// Format for a lowercase file extension.
    pub fn from_ext(ext: &str) -> Option<Self> {
        match ext {
            "zip" => Some(Self::Zip),
            "7z" => Some(Self::SevenZip),
            _ => None,
        }
    }
}

fn to_slash(name: &str) -> String {
    name.replace('\\', "/")
}

/// Entry name from its raw bytes.
///
/// Valid UTF-8 is taken as is. Anything else is decoded with `encoding`
/// when given; otherwise the raw bytes are kept, with invalid sequences
/// replaced by U+FFFD.
fn entry_name(raw: &[u8], encoding: Option<&'static Encoding>) -> String {
    if let Ok(name) = std::str::from_utf8(raw) {
        return name.to_string();
    }
    encoding
        .and_then(|encoding| decode(encoding, raw))
        .unwrap_or_else(|| String::from_utf8_lossy(raw).into_owned())
}

fn from_zip_datetime(dt: zip::DateTime) -> Option<OffsetDateTime> {
    let month = Month::try_from(dt.month()).ok()?;
    let date = time::Date::from_calendar_date(i32::from(dt.year()), month, dt.day()).ok()?;
    let datetime = date.with_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    Some(datetime.assume_utc())
}

fn from_nt_ticks(ticks: u64) -> Option<OffsetDateTime> {
    let nanos = (i128::from(ticks) - NT_TICKS_TO_UNIX_EPOCH) * 100;
    OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
}

pub(crate) fn zip_entries<R: Read + Seek>(
    reader: R,
    encoding: Option<&'static Encoding>,
) -> ArchiveResult<Vec<ArchivedFile>> {
    let mut archive = ZipArchive::new(reader)?;
    let mut files = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        // Raw access reads the header only, never the body
        let entry = archive.by_index_raw(index)?;
        let name = entry_name(entry.name_raw(), encoding);
        let modified: Option<zip::DateTime> = entry.last_modified().into();
        files.push(ArchivedFile {
            name: to_slash(&name),
            size: entry.size(),
            updated_at: modified.and_then(from_zip_datetime),
            is_directory: entry.is_dir(),
        });
    }

    Ok(files)
}

pub(crate) fn sevenz_entries<R: Read + Seek>(
    mut reader: R,
    len: u64,
) -> ArchiveResult<Vec<ArchivedFile>> {
    let archive = sevenz_rust::Archive::read(&mut reader, len, &[])
        .map_err(|e| ArchiveError::SevenZip(e.to_string()))?;

    Ok(archive
        .files
        .iter()
        .map(|entry| ArchivedFile {
            name: to_slash(&entry.name),
            size: entry.size,
            updated_at: entry
                .has_last_modified_date
                .then(|| from_nt_ticks(entry.last_modified_date.to_raw()))
                .flatten(),
            is_directory: entry.is_directory,
        })
        .collect())
}

impl ArchiveService {
    /// List the entries of a stored zip or 7z archive without extracting it.
    ///
    /// `entity_id` selects a stored version (the primary one when `None`).
    /// `text_encoding` names the legacy encoding used for entry names that
    /// are not UTF-8. Results are cached per entity and encoding.
    #[instrument(skip(self), fields(cache_hit = tracing::field::Empty))]
    pub async fn list_archive_files(
        &self,
        uri: &str,
        entity_id: Option<EntityId>,
        text_encoding: Option<&str>,
    ) -> ArchiveResult<Vec<ArchivedFile>> {
        let file = self.fs.get(uri).await?;
        if !file.is_file() {
            return Err(ArchiveError::NotSupported(format!("{uri} is not a file")));
        }

        let limit = self.config.max_decompress_size;
        if limit > 0 && file.size > limit {
            return Err(ArchiveError::SourceTooLarge {
                size: file.size,
                limit,
            });
        }

        let entity = file
            .find_entity(entity_id)
            .cloned()
            .ok_or_else(|| ArchiveError::EntityNotFound(uri.to_string()))?;

        let encoding_name = text_encoding.unwrap_or_default();
        let encoding = match encoding_name {
            "" => None,
            name => Some(
                self.encodings
                    .get(name)
                    .ok_or_else(|| ArchiveError::UnsupportedEncoding(name.to_string()))?,
            ),
        };

        let key = listing_key(entity.id, encoding_name);
        if let Some(listing) = self.cache.get(&key).await {
            tracing::Span::current().record("cache_hit", true);
            return Ok(listing.to_vec());
        }
        tracing::Span::current().record("cache_hit", false);

        let ext = file.ext().unwrap_or_default();
        let format =
            ArchiveFormat::from_ext(&ext).ok_or_else(|| ArchiveError::UnsupportedFormat(ext))?;

        let source = self.fs.open_entity(&entity).await?;
        let listing: Listing = Arc::new(self.decode(source, format, encoding).await?);
        debug!(entity = entity.id, entries = listing.len(), "Decoded archive listing");

        self.cache.insert(key, listing.clone()).await;
        Ok(listing.to_vec())
    }

    async fn decode(
        &self,
        source: Box<dyn EntitySource>,
        format: ArchiveFormat,
        encoding: Option<&'static Encoding>,
    ) -> ArchiveResult<Vec<ArchivedFile>> {
        self.check_cancelled()?;

        let reader = BlockingRangeReader::new(source, Handle::current())
            .with_cancellation(self.cancel.clone());
        let decoded = tokio::task::spawn_blocking(move || match format {
            ArchiveFormat::Zip => zip_entries(reader, encoding),
            ArchiveFormat::SevenZip => {
                let len = reader.size();
                sevenz_entries(reader, len)
            }
        })
        .await?;

        // Reads fail fast once cancelled; report that instead of the decode error
        self.check_cancelled()?;
        decoded
    }
}
