//! The station coordinate table.
//!
//! A hand-maintained CSV mapping display names to latitude/longitude:
//! ```text
//! location_name,lat,lon
//! Milano Centrale,45.4862,9.2045
//! Roma Termini,,
//! ```
//! Blank cells are expected: new names are added empty and filled in later.
//! The feed build trusts whatever numbers are present.

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::input::{read_record, walk_record_files};

pub const HEADER: [&str; 3] = ["location_name", "lat", "lon"];

const NAME_COLUMNS: &[&str] = &["location_name", "Location Name", "name"];
const LAT_COLUMNS: &[&str] = &["lat", "Lat"];
const LON_COLUMNS: &[&str] = &["lon", "Lon", "lng", "Lng"];

/// Raw cell values for one name, trimmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinateEntry {
    pub lat: String,
    pub lon: String,
}

/// A numeric, in-range coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Parses cell values, rejecting blanks, non-numbers and out-of-range
    /// values.
    pub fn parse(lat: &str, lon: &str) -> Option<Self> {
        let lat: f64 = lat.trim().parse().ok()?;
        let lon: f64 = lon.trim().parse().ok()?;
        let valid = (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon);
        valid.then_some(Self { lat, lon })
    }
}

impl CoordinateEntry {
    pub fn coordinate(&self) -> Option<Coordinate> {
        Coordinate::parse(&self.lat, &self.lon)
    }
}

/// Totals from merging newly observed names into the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub total: usize,
    pub added: usize,
    pub preserved: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CoordinateTable {
    entries: BTreeMap<String, CoordinateEntry>,
}

impl CoordinateTable {
    /// Loads the table from `path`. A missing file yields an empty table.
    pub fn load(path: &Path) -> Result<Self, FeedError> {
        if !path.exists() {
            warn!(path = %path.display(), "Coordinate table not found, every stop will be dropped");
            return Ok(Self::default());
        }
        let table = Self::from_reader(std::fs::File::open(path)?)?;
        debug!(path = %path.display(), entries = table.len(), "Coordinate table loaded");
        Ok(table)
    }

    /// Reads the table from CSV, tolerating a few header spellings.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, FeedError> {
        let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = rdr.headers()?.clone();

        let name_col = column(&headers, NAME_COLUMNS).ok_or_else(|| {
            FeedError::InvalidCoordinateTable(headers.iter().collect::<Vec<_>>().join(","))
        })?;
        let lat_col = column(&headers, LAT_COLUMNS);
        let lon_col = column(&headers, LON_COLUMNS);

        let cell = |record: &StringRecord, col: Option<usize>| -> String {
            col.and_then(|c| record.get(c))
                .unwrap_or("")
                .trim()
                .to_string()
        };

        let mut entries = BTreeMap::new();
        for record in rdr.records() {
            let record = record?;
            let name = cell(&record, Some(name_col));
            if name.is_empty() {
                continue;
            }
            let entry = CoordinateEntry {
                lat: cell(&record, lat_col),
                lon: cell(&record, lon_col),
            };
            entries.insert(name, entry);
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&CoordinateEntry> {
        self.entries.get(name)
    }

    /// The valid coordinate recorded for an exact display name.
    pub fn coordinate(&self, name: &str) -> Option<Coordinate> {
        self.get(name).and_then(CoordinateEntry::coordinate)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CoordinateEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn insert(&mut self, name: &str, lat: &str, lon: &str) {
        self.entries.insert(
            name.trim().to_string(),
            CoordinateEntry {
                lat: lat.trim().to_string(),
                lon: lon.trim().to_string(),
            },
        );
    }

    /// Adds blank rows for unseen names, leaving existing rows untouched.
    pub fn merge_names<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) -> MergeStats {
        let preserved = self.entries.len();
        for name in names {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            self.entries.entry(name.to_string()).or_default();
        }
        MergeStats {
            total: self.entries.len(),
            added: self.entries.len() - preserved,
            preserved,
        }
    }

    /// Writes the table with rows ordered case-insensitively by name.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), FeedError> {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then(a.cmp(b)));

        let mut wtr = WriterBuilder::new().from_writer(writer);
        wtr.write_record(HEADER)?;
        for name in names {
            let entry = &self.entries[name];
            wtr.write_record([name.as_str(), entry.lat.as_str(), entry.lon.as_str()])?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), FeedError> {
        self.to_writer(std::fs::File::create(path)?)
    }
}

fn column(headers: &StringRecord, candidates: &[&str]) -> Option<usize> {
    candidates
        .iter()
        .find_map(|c| headers.iter().position(|h| h.trim() == *c))
}

/// Scans every raw snapshot under `input_dir` for station names and merges
/// them into the table at `table_path`, preserving filled-in coordinates.
pub fn update_from_raw(input_dir: &Path, table_path: &Path) -> Result<MergeStats, FeedError> {
    let mut table = CoordinateTable::load(table_path)?;

    let mut names = Vec::new();
    for path in walk_record_files(input_dir)? {
        let file = match read_record(&path) {
            Ok(file) => file,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable raw record");
                continue;
            }
        };
        if let Some(schedule) = file.record.train_schedule.as_ref() {
            names.extend(schedule.station_names().map(str::to_string));
        }
    }

    let stats = table.merge_names(names.iter().map(String::as_str));
    table.save(table_path)?;

    info!(
        path = %table_path.display(),
        total = stats.total,
        added = stats.added,
        preserved = stats.preserved,
        "Coordinate table updated"
    );
    Ok(stats)
}
