//! Discovery and loading of raw per-train snapshot files.
//!
//! A run directory holds `<train>.json` or `<train>.json.gz` per train number.
//! Scraper bookkeeping files (`_summary.json`, `<train>.error.json`) and
//! normalizer output (`*.normalized.json`) live alongside and are skipped.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::FeedError;
use crate::parser::{RawTrainRecord, non_blank, parse_record};

const SKIPPED_SUFFIXES: &[&str] = &[".error.json", ".normalized.json"];

/// A parsed snapshot and where it came from.
#[derive(Debug, Clone)]
pub struct RawTrainFile {
    pub path: PathBuf,
    pub record: RawTrainRecord,
}

impl RawTrainFile {
    /// The record's own train number, else the file stem.
    ///
    /// # Errors
    ///
    /// [`FeedError::MissingTrainNumber`] when neither is usable.
    pub fn train_number(&self) -> Result<&str, FeedError> {
        self.record
            .train_schedule
            .as_ref()
            .and_then(|s| s.train_number())
            .or_else(|| non_blank(train_stem(&self.path)))
            .ok_or_else(|| FeedError::MissingTrainNumber(self.path.display().to_string()))
    }
}

/// The loaded contents of one run directory.
#[derive(Debug, Default)]
pub struct RawBatch {
    pub records: Vec<RawTrainFile>,
    /// Files that were present but could not be decoded.
    pub unreadable: usize,
}

/// Returns the train number encoded in a snapshot file name.
pub fn train_stem(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(".json.gz")
        .or_else(|| name.strip_suffix(".json"))
}

/// Whether `path` names a raw snapshot file.
pub fn is_record_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('_') || SKIPPED_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        return false;
    }
    name.ends_with(".json") || name.ends_with(".json.gz")
}

/// Lists snapshot files directly inside `dir`, sorted by file name.
pub fn list_record_files(dir: &Path) -> Result<Vec<PathBuf>, FeedError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_record_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Lists snapshot files anywhere under `root`, sorted by path.
pub fn walk_record_files(root: &Path) -> Result<Vec<PathBuf>, FeedError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_record_file(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Reads and parses one snapshot file.
pub fn read_record(path: &Path) -> Result<RawTrainFile, FeedError> {
    let bytes = fs::read(path)?;
    let record = parse_record(&bytes)?;
    Ok(RawTrainFile {
        path: path.to_path_buf(),
        record,
    })
}

/// Loads every snapshot in a run directory.
///
/// Undecodable files are counted and skipped.
///
/// # Errors
///
/// [`FeedError::NoRawRecords`] when the directory holds no snapshot files at
/// all; I/O errors listing the directory.
pub fn load_raw_dir(dir: &Path) -> Result<RawBatch, FeedError> {
    let files = list_record_files(dir)?;
    if files.is_empty() {
        return Err(FeedError::NoRawRecords(dir.to_path_buf()));
    }

    let mut batch = RawBatch::default();
    for path in files {
        match read_record(&path) {
            Ok(file) => batch.records.push(file),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable raw record");
                batch.unreadable += 1;
            }
        }
    }

    debug!(
        dir = %dir.display(),
        records = batch.records.len(),
        unreadable = batch.unreadable,
        "Raw records loaded"
    );
    Ok(batch)
}
