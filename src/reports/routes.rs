//! Compares expected origin/destination pairs with the routes in a feed.
//!
//! Expected routes are read from CSV only; spreadsheets are exported to CSV
//! beforehand.

use csv::{ReaderBuilder, StringRecord};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};
use std::path::Path;
use tracing::info;

use super::write_csv_rows;
use crate::error::FeedError;
use crate::gtfs::{Route, split_route_long_name};
use crate::output::read_routes;

const DEPARTURE_COLUMNS: &[&str] = &["Departure_mapped", "From_mapped", "Departure", "From"];
const ARRIVAL_COLUMNS: &[&str] = &["Arrival_mapped", "To_mapped", "Arrival", "To"];

const CSV_HEADER: [&str; 5] = ["departure", "arrival", "status", "trains", "gtfs_route_long_names"];

/// Lowercases and collapses runs of whitespace.
pub fn norm(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedRoute {
    pub departure: String,
    pub arrival: String,
}

/// Reads expected pairs from CSV. Mapped column names win over raw ones;
/// rows with both cells blank are skipped.
pub fn load_expected(path: &Path) -> Result<Vec<ExpectedRoute>, FeedError> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = rdr.headers()?.clone();

    let pick = |candidates: &[&str]| {
        candidates
            .iter()
            .find_map(|c| headers.iter().position(|h| h.trim() == *c))
    };
    let (Some(dep_col), Some(arr_col)) = (pick(DEPARTURE_COLUMNS), pick(ARRIVAL_COLUMNS)) else {
        return Err(FeedError::InvalidExpectedRoutes(
            headers.iter().collect::<Vec<_>>().join(","),
        ));
    };

    let cell = |record: &StringRecord, col: usize| record.get(col).unwrap_or("").trim().to_string();

    let mut expected = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let departure = cell(&record, dep_col);
        let arrival = cell(&record, arr_col);
        if departure.is_empty() && arrival.is_empty() {
            continue;
        }
        expected.push(ExpectedRoute { departure, arrival });
    }
    Ok(expected)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStatus {
    Ok,
    MissingInGtfs,
}

impl fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RouteStatus::Ok => "OK",
            RouteStatus::MissingInGtfs => "MISSING_IN_GTFS",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub departure: String,
    pub arrival: String,
    pub status: RouteStatus,
    /// Train numbers serving the pair, sorted, comma separated.
    pub trains: String,
    pub gtfs_route_long_names: String,
}

#[derive(Default)]
struct PairIndex {
    trains: BTreeSet<String>,
    long_names: BTreeSet<String>,
}

/// Matches each expected pair against the routes by normalized
/// origin/destination.
pub fn compare(expected: &[ExpectedRoute], routes: &[Route]) -> Vec<RouteMatch> {
    let mut index: BTreeMap<(String, String), PairIndex> = BTreeMap::new();
    for route in routes {
        let (origin, destination) = split_route_long_name(&route.route_long_name);
        let entry = index.entry((norm(&origin), norm(&destination))).or_default();
        let train = route.route_short_name.trim();
        if !train.is_empty() {
            entry.trains.insert(train.to_string());
        }
        let long_name = route.route_long_name.trim();
        if !long_name.is_empty() {
            entry.long_names.insert(long_name.to_string());
        }
    }

    expected
        .iter()
        .map(|e| match index.get(&(norm(&e.departure), norm(&e.arrival))) {
            Some(found) => RouteMatch {
                departure: e.departure.clone(),
                arrival: e.arrival.clone(),
                status: RouteStatus::Ok,
                trains: found.trains.iter().cloned().collect::<Vec<_>>().join(", "),
                gtfs_route_long_names: found
                    .long_names
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" | "),
            },
            None => RouteMatch {
                departure: e.departure.clone(),
                arrival: e.arrival.clone(),
                status: RouteStatus::MissingInGtfs,
                trains: String::new(),
                gtfs_route_long_names: String::new(),
            },
        })
        .collect()
}

pub fn render_markdown(matches: &[RouteMatch]) -> String {
    let missing: Vec<_> = matches
        .iter()
        .filter(|m| m.status == RouteStatus::MissingInGtfs)
        .collect();

    let mut md = String::from("# Missing routes report\n\n");
    let _ = writeln!(md, "- Expected pairs: **{}**", matches.len());
    let _ = writeln!(md, "- Missing in GTFS: **{}**\n", missing.len());

    md.push_str("## Missing (Expected but not in GTFS)\n\n");
    md.push_str("| departure | arrival |\n|---|---|\n");
    for m in &missing {
        let _ = writeln!(md, "| {} | {} |", m.departure, m.arrival);
    }

    md.push_str("\n## Present (Expected and found in GTFS)\n\n");
    md.push_str("| departure | arrival | trains |\n|---|---|---|\n");
    for m in matches.iter().filter(|m| m.status == RouteStatus::Ok) {
        let _ = writeln!(md, "| {} | {} | {} |", m.departure, m.arrival, m.trains);
    }
    md.push('\n');
    md
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteReportSummary {
    pub expected: usize,
    pub missing: usize,
}

/// Compares the routes in `archive` with `expected_path` and writes
/// `<prefix>_latest.csv` and `<prefix>_latest.md` into `out_dir`.
#[tracing::instrument(skip_all, fields(archive = %archive.display()))]
pub fn report_routes(
    expected_path: &Path,
    archive: &Path,
    out_dir: &Path,
    prefix: &str,
) -> Result<RouteReportSummary, FeedError> {
    let expected = load_expected(expected_path)?;
    let routes = read_routes(archive)?;
    let matches = compare(&expected, &routes);

    std::fs::create_dir_all(out_dir)?;
    let rows: Vec<[String; 5]> = matches
        .iter()
        .map(|m| {
            [
                m.departure.clone(),
                m.arrival.clone(),
                m.status.to_string(),
                m.trains.clone(),
                m.gtfs_route_long_names.clone(),
            ]
        })
        .collect();
    write_csv_rows(&out_dir.join(format!("{prefix}_latest.csv")), CSV_HEADER, &rows)?;
    std::fs::write(out_dir.join(format!("{prefix}_latest.md")), render_markdown(&matches))?;

    let summary = RouteReportSummary {
        expected: matches.len(),
        missing: matches
            .iter()
            .filter(|m| m.status == RouteStatus::MissingInGtfs)
            .count(),
    };
    info!(expected = summary.expected, missing = summary.missing, "Route report written");
    Ok(summary)
}
