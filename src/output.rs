//! Persistence for compiled feeds and run summaries.
//!
//! The archive is assembled fully in memory and written in one call, so a
//! failed build never leaves a partial feed on disk.

use csv::{ReaderBuilder, WriterBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::FeedError;
use crate::feed::GtfsFeed;
use crate::gtfs::{Agency, Calendar, FeedInfo, GtfsTable, Route, Stop, StopTime, Trip};

/// Serializes rows as a CSV table. The header row is always written, even
/// for an empty table.
pub fn table_bytes<T: GtfsTable>(rows: &[T]) -> Result<Vec<u8>, FeedError> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(T::HEADER)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| FeedError::Io(e.into_error()))
}

fn add_table<W: Write + Seek, T: GtfsTable>(
    zip: &mut ZipWriter<W>,
    options: SimpleFileOptions,
    rows: &[T],
) -> Result<(), FeedError> {
    let bytes = table_bytes(rows)?;
    zip.start_file(T::FILE_NAME, options)?;
    zip.write_all(&bytes)?;
    debug!(file = T::FILE_NAME, rows = rows.len(), "Table added to archive");
    Ok(())
}

/// Writes every table of `feed` into a zip archive.
///
/// Entries carry a fixed timestamp so the same feed always produces the
/// same bytes.
pub fn write_archive_to<W: Write + Seek>(writer: W, feed: &GtfsFeed) -> Result<W, FeedError> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let mut zip = ZipWriter::new(writer);
    add_table::<_, Agency>(&mut zip, options, std::slice::from_ref(&feed.agency))?;
    add_table::<_, Stop>(&mut zip, options, &feed.stops)?;
    add_table::<_, Route>(&mut zip, options, &feed.routes)?;
    add_table::<_, Trip>(&mut zip, options, &feed.trips)?;
    add_table::<_, StopTime>(&mut zip, options, &feed.stop_times)?;
    add_table::<_, Calendar>(&mut zip, options, std::slice::from_ref(&feed.calendar))?;
    add_table::<_, FeedInfo>(&mut zip, options, std::slice::from_ref(&feed.feed_info))?;
    Ok(zip.finish()?)
}

/// Writes the feed archive to `path`, creating parent directories.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn write_archive(path: &Path, feed: &GtfsFeed) -> Result<(), FeedError> {
    let bytes = write_archive_to(Cursor::new(Vec::new()), feed)?.into_inner();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &bytes)?;
    info!(bytes = bytes.len(), "GTFS archive written");
    Ok(())
}

/// Writes `value` as pretty-printed JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), FeedError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut content = serde_json::to_string_pretty(value)?;
    content.push('\n');
    std::fs::write(path, content)?;
    debug!(path = %path.display(), "JSON written");
    Ok(())
}

/// Reads one table out of a GTFS archive.
pub fn read_table<R: Read + Seek, T: DeserializeOwned>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<T>, FeedError> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(FeedError::MissingArchiveEntry(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(entry);
    let mut rows = Vec::new();
    for row in rdr.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Reads `routes.txt` from the archive at `path`.
pub fn read_routes(path: &Path) -> Result<Vec<Route>, FeedError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    read_table(&mut archive, Route::FILE_NAME)
}
