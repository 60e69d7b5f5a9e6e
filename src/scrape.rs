//! Bookkeeping for one scrape run: where each response lands and what the
//! run summary records.

use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::error::FeedError;
use crate::output::write_json;
use crate::parser::parse_record;

/// What became of one train's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Stored,
    Empty { stored: bool },
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScrapeCounts {
    pub ok: usize,
    pub empty: usize,
    pub error: usize,
}

impl ScrapeCounts {
    pub fn record(&mut self, outcome: SnapshotOutcome) {
        match outcome {
            SnapshotOutcome::Stored => self.ok += 1,
            SnapshotOutcome::Empty { .. } => self.empty += 1,
            SnapshotOutcome::Failed => self.error += 1,
        }
    }
}

/// Contents of a run's `_summary.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapeSummary {
    pub run_utc: String,
    pub range: [u32; 2],
    pub slice_size: u32,
    pub slice_index: u64,
    pub counts: ScrapeCounts,
    pub total_trains_this_run: usize,
}

#[derive(Serialize)]
struct ErrorMarker<'a> {
    train: &'a str,
    error: &'a str,
}

/// Options controlling how responses are stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    pub gzip: bool,
    pub skip_empty: bool,
}

/// Pause taken after each request: a fixed delay plus up to `jitter` of
/// random slack, so concurrent workers do not hit the endpoint in lockstep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pacing {
    pub delay: Duration,
    pub jitter: Duration,
}

impl Pacing {
    pub fn new(delay_ms: u64, jitter_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            jitter: Duration::from_millis(jitter_ms),
        }
    }

    pub fn pause(&self) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        self.delay + Duration::from_millis(rand::random_range(0..=jitter_ms))
    }
}

pub fn gzip_bytes(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// Writes the body verbatim as `<train>.json` (or `.json.gz`). Responses
/// flagged empty are counted and, with `skip_empty`, not written.
pub fn store_response(
    run_dir: &Path,
    train: &str,
    body: &[u8],
    options: StoreOptions,
) -> Result<SnapshotOutcome, FeedError> {
    let record = parse_record(body)?;
    let is_empty = record.is_empty.unwrap_or(false);
    if is_empty && options.skip_empty {
        return Ok(SnapshotOutcome::Empty { stored: false });
    }

    if options.gzip {
        std::fs::write(run_dir.join(format!("{train}.json.gz")), gzip_bytes(body)?)?;
    } else {
        std::fs::write(run_dir.join(format!("{train}.json")), body)?;
    }

    Ok(if is_empty {
        SnapshotOutcome::Empty { stored: true }
    } else {
        SnapshotOutcome::Stored
    })
}

/// Writes `<train>.error.json` after the last retry failed.
pub fn store_failure(run_dir: &Path, train: &str, error: &str) -> Result<SnapshotOutcome, FeedError> {
    write_json(
        &run_dir.join(format!("{train}.error.json")),
        &ErrorMarker { train, error },
    )?;
    Ok(SnapshotOutcome::Failed)
}
