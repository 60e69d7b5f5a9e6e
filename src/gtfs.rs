//! Typed rows for each table of the static GTFS archive.
//!
//! Field order is the column order written to the archive.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize, Serializer};

use crate::timing::GtfsTime;

/// GTFS `route_type` for heavy rail.
pub const ROUTE_TYPE_RAIL: u8 = 2;

/// Separator between origin and destination in `route_long_name`.
pub const LONG_NAME_SEPARATOR: &str = " – ";

/// A table in the archive: its file name and header row.
pub trait GtfsTable: Serialize {
    const FILE_NAME: &'static str;
    const HEADER: &'static [&'static str];
}

fn gtfs_date<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&date.format("%Y%m%d"))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Agency {
    pub agency_id: String,
    pub agency_name: String,
    pub agency_url: String,
    pub agency_timezone: String,
}

impl GtfsTable for Agency {
    const FILE_NAME: &'static str = "agency.txt";
    const HEADER: &'static [&'static str] =
        &["agency_id", "agency_name", "agency_url", "agency_timezone"];
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stop {
    pub stop_id: String,
    pub stop_name: String,
    /// Cell text from the coordinate table, already validated.
    pub stop_lat: String,
    pub stop_lon: String,
    pub stop_code: String,
}

impl GtfsTable for Stop {
    const FILE_NAME: &'static str = "stops.txt";
    const HEADER: &'static [&'static str] =
        &["stop_id", "stop_name", "stop_lat", "stop_lon", "stop_code"];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub route_id: String,
    pub agency_id: String,
    pub route_short_name: String,
    pub route_long_name: String,
    pub route_type: u8,
}

impl GtfsTable for Route {
    const FILE_NAME: &'static str = "routes.txt";
    const HEADER: &'static [&'static str] = &[
        "route_id",
        "agency_id",
        "route_short_name",
        "route_long_name",
        "route_type",
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trip {
    pub route_id: String,
    pub service_id: String,
    pub trip_id: String,
    pub trip_short_name: String,
}

impl GtfsTable for Trip {
    const FILE_NAME: &'static str = "trips.txt";
    const HEADER: &'static [&'static str] =
        &["route_id", "service_id", "trip_id", "trip_short_name"];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopTime {
    pub trip_id: String,
    pub arrival_time: Option<GtfsTime>,
    pub departure_time: Option<GtfsTime>,
    pub stop_id: String,
    pub stop_sequence: u32,
}

impl GtfsTable for StopTime {
    const FILE_NAME: &'static str = "stop_times.txt";
    const HEADER: &'static [&'static str] = &[
        "trip_id",
        "arrival_time",
        "departure_time",
        "stop_id",
        "stop_sequence",
    ];
}

/// A daily service pattern. Every weekday flag is `1` for this feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Calendar {
    pub service_id: String,
    pub monday: u8,
    pub tuesday: u8,
    pub wednesday: u8,
    pub thursday: u8,
    pub friday: u8,
    pub saturday: u8,
    pub sunday: u8,
    #[serde(serialize_with = "gtfs_date")]
    pub start_date: NaiveDate,
    #[serde(serialize_with = "gtfs_date")]
    pub end_date: NaiveDate,
}

impl Calendar {
    pub fn daily(service_id: String, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            service_id,
            monday: 1,
            tuesday: 1,
            wednesday: 1,
            thursday: 1,
            friday: 1,
            saturday: 1,
            sunday: 1,
            start_date,
            end_date,
        }
    }
}

impl GtfsTable for Calendar {
    const FILE_NAME: &'static str = "calendar.txt";
    const HEADER: &'static [&'static str] = &[
        "service_id",
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
        "sunday",
        "start_date",
        "end_date",
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedInfo {
    pub feed_publisher_name: String,
    pub feed_publisher_url: String,
    pub feed_lang: String,
    #[serde(serialize_with = "gtfs_date")]
    pub feed_start_date: NaiveDate,
    #[serde(serialize_with = "gtfs_date")]
    pub feed_end_date: NaiveDate,
    pub feed_version: String,
}

impl GtfsTable for FeedInfo {
    const FILE_NAME: &'static str = "feed_info.txt";
    const HEADER: &'static [&'static str] = &[
        "feed_publisher_name",
        "feed_publisher_url",
        "feed_lang",
        "feed_start_date",
        "feed_end_date",
        "feed_version",
    ];
}

/// Builds a `route_long_name` from origin and destination labels.
pub fn route_long_name(origin: &str, destination: &str) -> String {
    format!("{origin}{LONG_NAME_SEPARATOR}{destination}")
}

/// Splits a `route_long_name` back into `(origin, destination)`.
///
/// Falls back to a plain hyphen separator; a name with neither separator is
/// returned whole as the origin.
pub fn split_route_long_name(long_name: &str) -> (String, String) {
    let s = long_name.trim();
    for sep in [LONG_NAME_SEPARATOR, " - "] {
        if let Some((a, b)) = s.split_once(sep) {
            return (a.trim().to_string(), b.trim().to_string());
        }
    }
    (s.to_string(), String::new())
}
