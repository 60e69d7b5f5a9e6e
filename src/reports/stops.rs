//! Coordinate coverage of observed stop names, per run or cumulative.
//!
//! With an inventory the report accumulates every name ever observed
//! (first/last sighting, sighting count) so that "unused" table entries do
//! not flicker between runs. Without one, only the current run counts.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{sort_casefold, write_csv_rows};
use crate::coordinates::CoordinateTable;
use crate::error::FeedError;
use crate::input::{list_record_files, read_record};
use crate::output::write_json;

pub const RUN_UTC_FORMAT: &str = "%Y%m%dT%H%M%SZ";

const CSV_HEADER: [&str; 8] = [
    "location_name",
    "status",
    "lat",
    "lon",
    "first_seen_utc",
    "last_seen_utc",
    "seen_count",
    "stale",
];

const SECTION_LIMIT: usize = 200;
const HAS_COORDINATES_LIMIT: usize = 100;

pub fn parse_run_utc(run_utc: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(run_utc, RUN_UTC_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryEntry {
    pub first_seen_utc: String,
    pub last_seen_utc: String,
    pub seen_count: u64,
}

impl InventoryEntry {
    /// Not seen within `window_hours` of `now`. Unparseable sightings count
    /// as stale.
    pub fn is_stale(&self, now: DateTime<Utc>, window_hours: u64) -> bool {
        match parse_run_utc(&self.last_seen_utc) {
            Some(last) => (now - last).num_seconds() as f64 / 3600.0 > window_hours as f64,
            None => true,
        }
    }
}

/// Cumulative sightings of stop names, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StopInventory(pub BTreeMap<String, InventoryEntry>);

impl StopInventory {
    /// Loads an inventory; a missing or malformed file starts a fresh one.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No stop inventory, starting fresh");
                return Self::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Stop inventory unreadable, starting fresh");
            Self::default()
        })
    }

    /// An inventory holding only the names of one run.
    pub fn from_run(observed: &BTreeSet<String>, run_utc: &str) -> Self {
        let mut inventory = Self::default();
        inventory.merge(observed, run_utc);
        inventory
    }

    pub fn merge(&mut self, observed: &BTreeSet<String>, run_utc: &str) {
        for name in observed {
            let entry = self.0.entry(name.clone()).or_default();
            if entry.first_seen_utc.is_empty() {
                entry.first_seen_utc = run_utc.to_string();
            }
            entry.last_seen_utc = run_utc.to_string();
            entry.seen_count += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
    HasCoordinates,
    MissingCoordinates,
    NewNotInCoordinates,
}

impl StopStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StopStatus::HasCoordinates => "HAS_COORDINATES",
            StopStatus::MissingCoordinates => "MISSING_COORDINATES",
            StopStatus::NewNotInCoordinates => "NEW_NOT_IN_COORDINATES",
        }
    }

    pub fn of(name: &str, coordinates: &CoordinateTable) -> Self {
        match coordinates.get(name) {
            None => StopStatus::NewNotInCoordinates,
            Some(entry) if entry.coordinate().is_some() => StopStatus::HasCoordinates,
            Some(_) => StopStatus::MissingCoordinates,
        }
    }
}

/// Names per category, each sorted case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopCategories {
    pub has_coordinates: Vec<String>,
    pub missing_coordinates: Vec<String>,
    pub new_not_in_coordinates: Vec<String>,
    pub unused_in_coordinates: Vec<String>,
    /// Only computed with a staleness window.
    pub stale_inventory: Option<Vec<String>>,
}

pub fn categorize(
    coordinates: &CoordinateTable,
    inventory: &StopInventory,
    now: DateTime<Utc>,
    window_hours: Option<u64>,
) -> StopCategories {
    let mut cats = StopCategories {
        stale_inventory: window_hours.map(|_| Vec::new()),
        ..Default::default()
    };

    for (name, entry) in &inventory.0 {
        let bucket = match StopStatus::of(name, coordinates) {
            StopStatus::HasCoordinates => &mut cats.has_coordinates,
            StopStatus::MissingCoordinates => &mut cats.missing_coordinates,
            StopStatus::NewNotInCoordinates => &mut cats.new_not_in_coordinates,
        };
        bucket.push(name.clone());

        if let (Some(stale), Some(hours)) = (cats.stale_inventory.as_mut(), window_hours) {
            if entry.is_stale(now, hours) {
                stale.push(name.clone());
            }
        }
    }

    cats.unused_in_coordinates = coordinates
        .iter()
        .map(|(name, _)| name)
        .filter(|name| !inventory.0.contains_key(*name))
        .map(str::to_string)
        .collect();

    sort_casefold(&mut cats.has_coordinates);
    sort_casefold(&mut cats.missing_coordinates);
    sort_casefold(&mut cats.new_not_in_coordinates);
    sort_casefold(&mut cats.unused_in_coordinates);
    if let Some(stale) = cats.stale_inventory.as_mut() {
        sort_casefold(stale);
    }
    cats
}

/// One CSV row per inventory name.
pub fn build_rows(
    coordinates: &CoordinateTable,
    inventory: &StopInventory,
    now: DateTime<Utc>,
    window_hours: Option<u64>,
) -> Vec<[String; 8]> {
    let mut names: Vec<String> = inventory.0.keys().cloned().collect();
    sort_casefold(&mut names);

    names
        .into_iter()
        .map(|name| {
            let entry = &inventory.0[&name];
            let (lat, lon) = coordinates
                .get(&name)
                .map(|e| (e.lat.clone(), e.lon.clone()))
                .unwrap_or_default();
            let status = StopStatus::of(&name, coordinates).as_str().to_string();
            let stale = match window_hours {
                Some(hours) if entry.is_stale(now, hours) => "YES",
                Some(_) => "NO",
                None => "",
            };
            [
                name,
                status,
                lat,
                lon,
                entry.first_seen_utc.clone(),
                entry.last_seen_utc.clone(),
                entry.seen_count.to_string(),
                stale.to_string(),
            ]
        })
        .collect()
}

/// Distinct stop names in a run directory and the number of records that
/// carried a schedule.
pub fn collect_observed(raw_dir: &Path) -> Result<(BTreeSet<String>, usize), FeedError> {
    let mut observed = BTreeSet::new();
    let mut trains = 0;
    for path in list_record_files(raw_dir)? {
        let Ok(file) = read_record(&path) else {
            debug!(path = %path.display(), "Skipping unreadable raw record");
            continue;
        };
        if let Some(schedule) = file.record.schedule() {
            trains += 1;
            observed.extend(schedule.station_names().map(str::to_string));
        }
    }
    Ok((observed, trains))
}

#[derive(Debug, Clone, Default)]
pub struct StopReportOptions {
    pub run_utc: String,
    pub inventory_in: Option<PathBuf>,
    pub inventory_out: Option<PathBuf>,
    /// Flag names unseen for longer than this many hours.
    pub window_hours: Option<u64>,
}

impl StopReportOptions {
    fn cumulative(&self) -> bool {
        self.inventory_in.is_some() || self.inventory_out.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopReportSummary {
    pub trains: usize,
    pub observed: usize,
    pub inventory: usize,
    pub missing_coordinates: usize,
    pub new_not_in_coordinates: usize,
}

struct MarkdownContext<'a> {
    run_utc: &'a str,
    trains: usize,
    observed: usize,
    inventory: usize,
    window_hours: Option<u64>,
    cumulative: bool,
}

fn section(md: &mut String, title: &str, items: &[String], limit: usize) {
    let _ = writeln!(md, "\n## {title} ({})", items.len());
    if items.is_empty() {
        md.push_str("_None_\n");
        return;
    }
    if items.len() > limit {
        let _ = writeln!(md, "_Showing first {limit} only. See CSV for full list._");
    }
    for item in items.iter().take(limit) {
        let _ = writeln!(md, "- {item}");
    }
}

fn render_markdown(ctx: &MarkdownContext<'_>, cats: &StopCategories) -> String {
    let mut md = String::from("# Italo stops coordinates report\n\n");
    let _ = writeln!(md, "- Run: `{}`", ctx.run_utc);
    let _ = writeln!(md, "- Normalized trains (ok): **{}**", ctx.trains);
    let _ = writeln!(md, "- Unique stops observed in this run: **{}**", ctx.observed);
    let _ = writeln!(md, "- Unique stops in inventory: **{}**", ctx.inventory);
    let _ = writeln!(md, "- Stops with coordinates: **{}**", cats.has_coordinates.len());
    let _ = writeln!(md, "- Stops missing coordinates: **{}**", cats.missing_coordinates.len());
    let _ = writeln!(
        md,
        "- New stops not in coordinates.csv: **{}**",
        cats.new_not_in_coordinates.len()
    );
    let _ = writeln!(
        md,
        "- Unused entries in coordinates.csv (never seen in inventory): **{}**",
        cats.unused_in_coordinates.len()
    );
    if let (Some(hours), Some(stale)) = (ctx.window_hours, &cats.stale_inventory) {
        let _ = writeln!(
            md,
            "- Stale inventory stops (not seen in last {hours}h): **{}**",
            stale.len()
        );
    }

    if ctx.cumulative {
        md.push_str("\n_This report is **cumulative** (uses stop_inventory.json)._\n");
    } else {
        md.push_str("\n_This report is **per-run** (no inventory provided)._\n");
    }

    section(&mut md, "Missing coordinates", &cats.missing_coordinates, SECTION_LIMIT);
    section(
        &mut md,
        "New stops not in coordinates.csv",
        &cats.new_not_in_coordinates,
        SECTION_LIMIT,
    );
    section(
        &mut md,
        "Unused entries in coordinates.csv (never seen in inventory)",
        &cats.unused_in_coordinates,
        SECTION_LIMIT,
    );
    if let (Some(hours), Some(stale)) = (ctx.window_hours, &cats.stale_inventory) {
        section(
            &mut md,
            &format!("Stale inventory (not seen within {hours} hours)"),
            stale,
            SECTION_LIMIT,
        );
    }
    section(&mut md, "Has coordinates", &cats.has_coordinates, HAS_COORDINATES_LIMIT);
    md
}

/// Writes `stops_report_<run>.{csv,md}` and `stops_report_latest.{csv,md}`
/// into `out_dir`, updating the inventory when one is configured.
#[tracing::instrument(skip_all, fields(raw_dir = %raw_dir.display(), run_utc = %options.run_utc))]
pub fn report_stops(
    raw_dir: &Path,
    coordinates: &CoordinateTable,
    out_dir: &Path,
    options: &StopReportOptions,
) -> Result<StopReportSummary, FeedError> {
    let (observed, trains) = collect_observed(raw_dir)?;
    let now = parse_run_utc(&options.run_utc).unwrap_or_else(Utc::now);

    let inventory = if options.cumulative() {
        let mut inventory = options
            .inventory_in
            .as_deref()
            .map(StopInventory::load)
            .unwrap_or_default();
        inventory.merge(&observed, &options.run_utc);
        if let Some(path) = options.inventory_out.as_deref() {
            write_json(path, &inventory)?;
        }
        inventory
    } else {
        StopInventory::from_run(&observed, &options.run_utc)
    };

    let window_hours = options.window_hours.filter(|h| *h > 0);
    let cats = categorize(coordinates, &inventory, now, window_hours);
    let rows = build_rows(coordinates, &inventory, now, window_hours);
    let md = render_markdown(
        &MarkdownContext {
            run_utc: &options.run_utc,
            trains,
            observed: observed.len(),
            inventory: inventory.len(),
            window_hours,
            cumulative: options.cumulative(),
        },
        &cats,
    );

    std::fs::create_dir_all(out_dir)?;
    for tag in [options.run_utc.as_str(), "latest"] {
        write_csv_rows(&out_dir.join(format!("stops_report_{tag}.csv")), CSV_HEADER, &rows)?;
        std::fs::write(out_dir.join(format!("stops_report_{tag}.md")), &md)?;
    }

    let summary = StopReportSummary {
        trains,
        observed: observed.len(),
        inventory: inventory.len(),
        missing_coordinates: cats.missing_coordinates.len(),
        new_not_in_coordinates: cats.new_not_in_coordinates.len(),
    };
    info!(
        trains = summary.trains,
        observed = summary.observed,
        inventory = summary.inventory,
        missing_coordinates = summary.missing_coordinates,
        new_not_in_coordinates = summary.new_not_in_coordinates,
        "Stop report written"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn coords() -> CoordinateTable {
        let csv = "location_name,lat,lon\n\
                   Milano Centrale,45.4862,9.2045\n\
                   Roma Termini,,\n\
                   Ancona,43.6,13.5\n";
        CoordinateTable::from_reader(csv.as_bytes()).unwrap()
    }

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_run_utc() {
        let dt = parse_run_utc("20260220T083254Z").unwrap();
        assert_eq!(dt.format(RUN_UTC_FORMAT).to_string(), "20260220T083254Z");
        assert!(parse_run_utc("2026-02-20").is_none());
    }

    #[test]
    fn test_inventory_merge() {
        let mut inventory = StopInventory::default();
        inventory.merge(&names(&["A", "B"]), "20260301T000000Z");
        inventory.merge(&names(&["B"]), "20260302T000000Z");

        let b = &inventory.0["B"];
        assert_eq!(b.first_seen_utc, "20260301T000000Z");
        assert_eq!(b.last_seen_utc, "20260302T000000Z");
        assert_eq!(b.seen_count, 2);
        assert_eq!(inventory.0["A"].seen_count, 1);
    }

    #[test]
    fn test_staleness() {
        let entry = InventoryEntry {
            first_seen_utc: "20260301T000000Z".into(),
            last_seen_utc: "20260301T000000Z".into(),
            seen_count: 1,
        };
        let now = parse_run_utc("20260308T000000Z").unwrap();
        assert!(!entry.is_stale(now, 168));
        assert!(entry.is_stale(now, 167));

        let unparseable = InventoryEntry::default();
        assert!(unparseable.is_stale(now, 10_000));
    }

    #[test]
    fn test_categorize() {
        let inventory = StopInventory::from_run(
            &names(&["Milano Centrale", "Roma Termini", "bari", "Caserta"]),
            "20260301T000000Z",
        );
        let now = parse_run_utc("20260301T000000Z").unwrap();
        let cats = categorize(&coords(), &inventory, now, None);

        assert_eq!(cats.has_coordinates, vec!["Milano Centrale"]);
        assert_eq!(cats.missing_coordinates, vec!["Roma Termini"]);
        assert_eq!(cats.new_not_in_coordinates, vec!["bari", "Caserta"]);
        assert_eq!(cats.unused_in_coordinates, vec!["Ancona"]);
        assert_eq!(cats.stale_inventory, None);
    }

    #[test]
    fn test_build_rows() {
        let inventory = StopInventory::from_run(&names(&["Roma Termini"]), "20260301T000000Z");
        let now = parse_run_utc("20260310T000000Z").unwrap();
        let rows = build_rows(&coords(), &inventory, now, Some(24));
        assert_eq!(
            rows,
            vec![[
                "Roma Termini".to_string(),
                "MISSING_COORDINATES".into(),
                "".into(),
                "".into(),
                "20260301T000000Z".into(),
                "20260301T000000Z".into(),
                "1".into(),
                "YES".into(),
            ]]
        );
    }

    #[test]
    fn test_inventory_load_tolerates_garbage() {
        let path = env::temp_dir().join("rail_gtfs_inventory_garbage.json");
        fs::write(&path, "not json").unwrap();
        assert!(StopInventory::load(&path).is_empty());
        fs::remove_file(&path).unwrap();

        assert!(StopInventory::load(Path::new("/nonexistent/inventory.json")).is_empty());
    }

    #[test]
    fn test_report_stops_cumulative() {
        let root = env::temp_dir().join("rail_gtfs_report_stops");
        let _ = fs::remove_dir_all(&root);
        let raw = root.join("raw");
        fs::create_dir_all(&raw).unwrap();
        fs::write(
            raw.join("9901.json"),
            r#"{"TrainSchedule": {"StazioniFerme": [
                {"LocationDescription": "Milano Centrale"},
                {"LocationDescription": "Salerno"}
            ]}}"#,
        )
        .unwrap();
        fs::write(raw.join("9999.json"), r#"{"IsEmpty": true}"#).unwrap();

        let inventory_path = root.join("stop_inventory.json");
        let out = root.join("reports");
        let options = StopReportOptions {
            run_utc: "20260301T080000Z".into(),
            inventory_in: Some(inventory_path.clone()),
            inventory_out: Some(inventory_path.clone()),
            window_hours: Some(168),
        };

        let first = report_stops(&raw, &coords(), &out, &options).unwrap();
        assert_eq!(first.trains, 1);
        assert_eq!(first.observed, 2);
        assert_eq!(first.new_not_in_coordinates, 1);

        let second = report_stops(&raw, &coords(), &out, &options).unwrap();
        assert_eq!(second.inventory, 2);
        let saved = StopInventory::load(&inventory_path);
        assert_eq!(saved.0["Salerno"].seen_count, 2);

        assert!(out.join("stops_report_20260301T080000Z.csv").exists());
        let md = fs::read_to_string(out.join("stops_report_latest.md")).unwrap();
        assert!(md.contains("_This report is **cumulative**"));
        assert!(md.contains("## Stale inventory (not seen within 168 hours) (0)"));

        let csv = fs::read_to_string(out.join("stops_report_latest.csv")).unwrap();
        assert_eq!(csv.lines().next(), Some(CSV_HEADER.join(",").as_str()));

        fs::remove_dir_all(&root).unwrap();
    }
}
