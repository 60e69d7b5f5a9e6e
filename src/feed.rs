//! Aggregates assembled trips into the tables of one GTFS feed.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::assembler::{AssembledTrip, BuildContext, TripOutcome, assemble_trip};
use crate::config::BuildConfig;
use crate::coordinates::CoordinateTable;
use crate::error::FeedError;
use crate::gtfs::{
    Agency, Calendar, FeedInfo, ROUTE_TYPE_RAIL, Route, Stop, StopTime, Trip, route_long_name,
};
use crate::input::{RawBatch, RawTrainFile};
use crate::registry::StopRegistry;
use crate::stats::BuildSummary;

/// Every table of a compiled feed, in emission order.
#[derive(Debug, Clone)]
pub struct GtfsFeed {
    pub agency: Agency,
    pub stops: Vec<Stop>,
    pub routes: Vec<Route>,
    pub trips: Vec<Trip>,
    pub stop_times: Vec<StopTime>,
    pub calendar: Calendar,
    pub feed_info: FeedInfo,
    pub summary: BuildSummary,
}

/// Accumulates trips for one run, then emits the feed.
#[derive(Debug)]
pub struct FeedCompiler<'a> {
    ctx: BuildContext<'a>,
    seen: BTreeSet<String>,
    trips: BTreeMap<String, AssembledTrip>,
    routes: BTreeMap<String, Route>,
}

impl<'a> FeedCompiler<'a> {
    pub fn new(config: &'a BuildConfig, coordinates: &'a CoordinateTable) -> Self {
        Self {
            ctx: BuildContext::new(config, StopRegistry::new(coordinates)),
            seen: BTreeSet::new(),
            trips: BTreeMap::new(),
            routes: BTreeMap::new(),
        }
    }

    /// Assembles one record and keeps the trip if it survives.
    ///
    /// The first record for a train number wins, whether or not it yields a
    /// trip; later records for the same train are skipped.
    pub fn add_record(&mut self, file: &RawTrainFile) -> Result<(), FeedError> {
        self.ctx.summary.records_read += 1;

        let train = file.train_number()?;
        let trip_id = self.ctx.trip_id(train);
        if !self.seen.insert(trip_id) {
            warn!(train, path = %file.path.display(), "Duplicate record for train, keeping the first");
            self.ctx.summary.duplicate_trains += 1;
            return Ok(());
        }

        if let TripOutcome::Assembled(trip) = assemble_trip(&mut self.ctx, file)? {
            self.register_route(&trip);
            self.ctx.summary.trips_built += 1;
            self.trips.insert(trip.trip_id().to_string(), trip);
        }
        Ok(())
    }

    fn register_route(&mut self, trip: &AssembledTrip) {
        let agency_id = &self.ctx.config.agency.agency_id;
        self.routes.entry(trip.route_id()).or_insert_with(|| Route {
            route_id: trip.route_id(),
            agency_id: agency_id.clone(),
            route_short_name: trip.train_number().to_string(),
            route_long_name: route_long_name(trip.origin(), trip.destination()),
            route_type: ROUTE_TYPE_RAIL,
        });
    }

    /// Emits the feed. Stops, routes and trips are ordered by id; stop times
    /// follow their trip in sequence order.
    pub fn finish(self) -> GtfsFeed {
        let Self {
            ctx, trips, routes, ..
        } = self;
        let BuildContext {
            config,
            registry,
            mut summary,
        } = ctx;

        summary.stop_names_missing_coords = registry.missing_names().count();
        let stops = registry.into_stops();
        let service_id = config.service_id();

        let mut trip_rows = Vec::with_capacity(trips.len());
        let mut stop_times = Vec::new();
        for trip in trips.into_values() {
            trip_rows.push(Trip {
                route_id: trip.route_id(),
                service_id: service_id.clone(),
                trip_id: trip.trip_id().to_string(),
                trip_short_name: trip.train_number().to_string(),
            });
            stop_times.extend(trip.into_stop_times());
        }

        let routes: Vec<Route> = routes.into_values().collect();

        summary.stops = stops.len();
        summary.routes = routes.len();
        summary.stop_times = stop_times.len();

        let agency = &config.agency;
        let end_date = config.service_end_date();
        if end_date < config.service_date {
            warn!(
                service_date = %config.service_date,
                end_date = %end_date,
                "Service date lies after the calendar window"
            );
        }

        GtfsFeed {
            agency: Agency {
                agency_id: agency.agency_id.clone(),
                agency_name: agency.agency_name.clone(),
                agency_url: agency.agency_url.clone(),
                agency_timezone: agency.agency_timezone.clone(),
            },
            stops,
            routes,
            trips: trip_rows,
            stop_times,
            calendar: Calendar::daily(service_id, config.service_date, end_date),
            feed_info: FeedInfo {
                feed_publisher_name: agency.publisher_name().to_string(),
                feed_publisher_url: agency.publisher_url().to_string(),
                feed_lang: agency.feed_lang.clone(),
                feed_start_date: config.service_date,
                feed_end_date: end_date,
                feed_version: config.service_date_compact(),
            },
            summary,
        }
    }
}

/// Compiles a feed from a loaded batch of raw records.
///
/// # Errors
///
/// Fails on the first record that has no train number.
pub fn build_feed(
    batch: &RawBatch,
    coordinates: &CoordinateTable,
    config: &BuildConfig,
) -> Result<GtfsFeed, FeedError> {
    let mut compiler = FeedCompiler::new(config, coordinates);
    for file in &batch.records {
        compiler.add_record(file)?;
    }
    let mut feed = compiler.finish();
    feed.summary.records_unreadable = batch.unreadable;

    info!(
        trips = feed.trips.len(),
        routes = feed.routes.len(),
        stops = feed.stops.len(),
        "Feed compiled"
    );
    Ok(feed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgencyConfig;
    use crate::parser::parse_record;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn coords() -> CoordinateTable {
        let csv = "location_name,lat,lon\n\
                   Milano Centrale,45.4862,9.2045\n\
                   Bologna Centrale,44.5059,11.3431\n\
                   Roma Termini,41.9010,12.5016\n\
                   Torino Porta Nuova,45.0625,7.6786\n";
        CoordinateTable::from_reader(csv.as_bytes()).unwrap()
    }

    fn config() -> BuildConfig {
        BuildConfig::new("20260301", Some("20260302"), AgencyConfig::default()).unwrap()
    }

    fn file(train: &str, json: &str) -> RawTrainFile {
        RawTrainFile {
            path: PathBuf::from(format!("raw/{train}.json")),
            record: parse_record(json.as_bytes()).unwrap(),
        }
    }

    fn batch() -> RawBatch {
        RawBatch {
            records: vec![
                file(
                    "9901",
                    r#"{"TrainSchedule": {
                        "DepartureStationDescription": "Milano Centrale",
                        "ArrivalStationDescription": "Roma Termini",
                        "StazionePartenza": {"StationNumber": 0, "LocationCode": "MC_", "LocationDescription": "Milano Centrale", "EstimatedDepartureTime": "06:00"},
                        "StazioniFerme": [
                            {"StationNumber": 1, "LocationCode": "BC_", "LocationDescription": "Bologna Centrale", "EstimatedArrivalTime": "07:05", "EstimatedDepartureTime": "07:08"},
                            {"StationNumber": 2, "LocationCode": "RMT", "LocationDescription": "Roma Termini", "EstimatedArrivalTime": "09:10"}
                        ]}}"#,
                ),
                file(
                    "8101",
                    r#"{"TrainSchedule": {
                        "DepartureStationDescription": "Torino Porta Nuova",
                        "ArrivalStationDescription": "Salerno",
                        "StazionePartenza": {"StationNumber": 0, "LocationCode": "TPN", "LocationDescription": "Torino Porta Nuova", "EstimatedDepartureTime": "23:00"},
                        "StazioniFerme": [
                            {"StationNumber": 1, "LocationCode": "SA_", "LocationDescription": "Salerno", "EstimatedArrivalTime": "04:00"}
                        ]}}"#,
                ),
                file("9999", r#"{"IsEmpty": true}"#),
                file(
                    "9901",
                    r#"{"TrainSchedule": {"StazioniFerme": [
                        {"StationNumber": 1, "LocationDescription": "Milano Centrale"},
                        {"StationNumber": 2, "LocationDescription": "Roma Termini"}
                    ]}}"#,
                ),
            ],
            unreadable: 2,
        }
    }

    #[test]
    fn test_build_feed_tables() {
        let coords = coords();
        let config = config();
        let feed = build_feed(&batch(), &coords, &config).unwrap();

        assert_eq!(feed.trips.len(), 1);
        assert_eq!(feed.trips[0].trip_id, "T_9901_20260301");
        assert_eq!(feed.trips[0].service_id, "SVC_20260301");
        assert_eq!(feed.trips[0].trip_short_name, "9901");

        assert_eq!(feed.routes.len(), 1);
        let route = &feed.routes[0];
        assert_eq!(route.route_id, "R_9901");
        assert_eq!(route.agency_id, "ITALO");
        assert_eq!(route.route_long_name, "Milano Centrale – Roma Termini");
        assert_eq!(route.route_type, 2);

        let seqs: Vec<_> = feed.stop_times.iter().map(|s| s.stop_sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);

        // Torino was registered before its trip was rejected
        let stop_ids: Vec<_> = feed.stops.iter().map(|s| s.stop_id.as_str()).collect();
        assert_eq!(stop_ids, vec!["STOP_BC_", "STOP_MC_", "STOP_RMT", "STOP_TPN"]);
    }

    #[test]
    fn test_build_feed_summary() {
        let coords = coords();
        let config = config();
        let feed = build_feed(&batch(), &coords, &config).unwrap();
        let s = &feed.summary;

        assert_eq!(s.service_date, "20260301");
        assert_eq!(s.records_read, 4);
        assert_eq!(s.records_empty, 1);
        assert_eq!(s.records_unreadable, 2);
        assert_eq!(s.duplicate_trains, 1);
        assert_eq!(s.trips_built, 1);
        assert_eq!(s.trips_dropped_min_stops, 1);
        assert_eq!(s.stop_times_dropped_missing_coords, 1);
        assert_eq!(s.stop_names_missing_coords, 1);
        assert_eq!(s.stops, 4);
        assert_eq!(s.routes, 1);
        assert_eq!(s.stop_times, 3);
    }

    #[test]
    fn test_calendar_and_feed_info() {
        let coords = coords();
        let config = config();
        let feed = build_feed(&batch(), &coords, &config).unwrap();

        let start = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2027, 3, 2).unwrap();
        assert_eq!(feed.calendar, Calendar::daily("SVC_20260301".into(), start, end));
        assert_eq!(feed.feed_info.feed_start_date, start);
        assert_eq!(feed.feed_info.feed_end_date, end);
        assert_eq!(feed.feed_info.feed_publisher_name, "Italo");
        assert_eq!(feed.feed_info.feed_lang, "it");
    }

    #[test]
    fn test_every_route_is_referenced() {
        let coords = coords();
        let config = config();
        let feed = build_feed(&batch(), &coords, &config).unwrap();

        let used: BTreeSet<_> = feed.trips.iter().map(|t| t.route_id.as_str()).collect();
        for route in &feed.routes {
            assert!(used.contains(route.route_id.as_str()));
        }
    }

    #[test]
    fn test_build_feed_is_deterministic() {
        let coords = coords();
        let config = config();
        let a = build_feed(&batch(), &coords, &config).unwrap();

        let mut reversed = batch();
        reversed.records.swap(0, 1);
        let b = build_feed(&reversed, &coords, &config).unwrap();

        assert_eq!(a.stops, b.stops);
        assert_eq!(a.routes, b.routes);
        assert_eq!(a.trips, b.trips);
        assert_eq!(a.stop_times, b.stop_times);
    }

    #[test]
    fn test_missing_train_number_aborts_build() {
        let coords = coords();
        let config = config();
        let batch = RawBatch {
            records: vec![RawTrainFile {
                path: PathBuf::from("raw/.json"),
                record: parse_record(br#"{"TrainSchedule": {}}"#).unwrap(),
            }],
            unreadable: 0,
        };
        assert!(matches!(
            build_feed(&batch, &coords, &config),
            Err(FeedError::MissingTrainNumber(_))
        ));
    }
}
