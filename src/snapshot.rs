//! Collapses many scrape runs into one directory holding the newest snapshot
//! of every train.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::FeedError;
use crate::input::{list_record_files, train_stem};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub runs: usize,
    pub copied: usize,
    pub unique: usize,
}

/// Run directories directly under `root`, oldest first. Run ids are
/// `YYYYMMDDTHHMMSSZ` stamps, so name order is time order.
pub fn run_dirs(root: &Path) -> Result<Vec<PathBuf>, FeedError> {
    if !root.is_dir() {
        return Err(FeedError::NotADirectory(root.to_path_buf()));
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Copies every snapshot from every run under `root` into `out_dir`, later
/// runs overwriting earlier ones.
///
/// A train stored compressed in one run and plain in another keeps only the
/// newest file.
#[tracing::instrument(skip_all, fields(root = %root.display(), out = %out_dir.display()))]
pub fn merge_latest(root: &Path, out_dir: &Path) -> Result<MergeSummary, FeedError> {
    let runs = run_dirs(root)?;
    if runs.is_empty() {
        return Err(FeedError::NoRunDirectories(root.to_path_buf()));
    }
    fs::create_dir_all(out_dir)?;

    let mut copied = 0;
    for run in &runs {
        for src in list_record_files(run)? {
            let (Some(name), Some(train)) = (src.file_name(), train_stem(&src)) else {
                continue;
            };
            for sibling in [format!("{train}.json"), format!("{train}.json.gz")] {
                let stale = out_dir.join(&sibling);
                if sibling.as_str() != name && stale.exists() {
                    fs::remove_file(&stale)?;
                }
            }
            fs::copy(&src, out_dir.join(name))?;
            copied += 1;
        }
        debug!(run = %run.display(), "Run merged");
    }

    let unique: BTreeSet<String> = list_record_files(out_dir)?
        .iter()
        .filter_map(|p| train_stem(p).map(str::to_string))
        .collect();

    let summary = MergeSummary {
        runs: runs.len(),
        copied,
        unique: unique.len(),
    };
    info!(
        runs = summary.runs,
        copied = summary.copied,
        unique = summary.unique,
        "Snapshots merged"
    );
    Ok(summary)
}
