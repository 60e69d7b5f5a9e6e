//! Turns one raw per-train record into at most one trip.

use tracing::{debug, warn};

use crate::config::BuildConfig;
use crate::error::FeedError;
use crate::gtfs::StopTime;
use crate::input::RawTrainFile;
use crate::parser::{RawStop, TrainSchedule};
use crate::registry::StopRegistry;
use crate::stats::BuildSummary;
use crate::timing::{StopTimes, reconcile, strip_boundaries};

/// Trips with fewer kept stops than this are discarded whole.
pub const MIN_TRIP_STOPS: usize = 2;

/// Mutable state shared by every trip of one feed build.
#[derive(Debug)]
pub struct BuildContext<'a> {
    pub config: &'a BuildConfig,
    pub registry: StopRegistry<'a>,
    pub summary: BuildSummary,
}

impl<'a> BuildContext<'a> {
    pub fn new(config: &'a BuildConfig, registry: StopRegistry<'a>) -> Self {
        Self {
            config,
            registry,
            summary: BuildSummary::new(&config.service_date_compact()),
        }
    }

    pub fn trip_id(&self, train: &str) -> String {
        format!("T_{train}_{}", self.config.service_date_compact())
    }
}

/// A raw stop in timeline position.
#[derive(Debug, Clone, Copy)]
pub struct OrderedStop<'r> {
    pub station_order: Option<i64>,
    /// Position in origin/scheduled/pass-through concatenation order.
    pub insertion_index: usize,
    pub raw: &'r RawStop,
}

impl OrderedStop<'_> {
    fn sort_key(&self) -> (i64, usize) {
        (self.station_order.unwrap_or(i64::MAX), self.insertion_index)
    }
}

/// Orders a schedule's stops by station-order number, then by concatenation
/// order. Stops without an order number go last.
pub fn order_stops(schedule: &TrainSchedule) -> Vec<OrderedStop<'_>> {
    let mut stops: Vec<_> = schedule
        .raw_stops()
        .enumerate()
        .map(|(insertion_index, raw)| OrderedStop {
            station_order: raw.station_number,
            insertion_index,
            raw,
        })
        .collect();
    stops.sort_by_key(OrderedStop::sort_key);
    stops
}

/// Counts neighbouring stops that share a station-order number.
pub fn order_ties(stops: &[OrderedStop<'_>]) -> usize {
    stops
        .windows(2)
        .filter(|w| w[0].station_order.is_some() && w[0].station_order == w[1].station_order)
        .count()
}

/// Reconciles arrival/departure times over the full ordered timeline.
pub fn reconcile_stops(stops: &[OrderedStop<'_>]) -> Vec<StopTimes> {
    let clock: Vec<_> = stops
        .iter()
        .map(|s| {
            (
                s.raw.estimated_arrival_time.as_deref(),
                s.raw.estimated_departure_time.as_deref(),
            )
        })
        .collect();
    reconcile(&clock)
}

/// A retained trip. Always has at least [`MIN_TRIP_STOPS`] stop times,
/// numbered contiguously from 0.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledTrip {
    trip_id: String,
    train_number: String,
    origin: String,
    destination: String,
    stop_times: Vec<StopTime>,
}

impl AssembledTrip {
    fn new(
        trip_id: String,
        train_number: String,
        origin: String,
        destination: String,
        stop_times: Vec<StopTime>,
    ) -> Option<Self> {
        (stop_times.len() >= MIN_TRIP_STOPS).then_some(Self {
            trip_id,
            train_number,
            origin,
            destination,
            stop_times,
        })
    }

    pub fn trip_id(&self) -> &str {
        &self.trip_id
    }

    pub fn train_number(&self) -> &str {
        &self.train_number
    }

    pub fn route_id(&self) -> String {
        route_id(&self.train_number)
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn stop_times(&self) -> &[StopTime] {
        &self.stop_times
    }

    pub fn into_stop_times(self) -> Vec<StopTime> {
        self.stop_times
    }
}

pub fn route_id(train: &str) -> String {
    format!("R_{train}")
}

#[derive(Debug, Clone, PartialEq)]
pub enum TripOutcome {
    Assembled(AssembledTrip),
    /// Flagged empty or carrying no schedule.
    NoSchedule,
    /// Coordinate filtering left fewer than [`MIN_TRIP_STOPS`] stops.
    TooFewStops { kept: usize },
}

/// Builds the trip for one raw record.
///
/// Dropped stops and rejected trips are tallied in the context summary.
///
/// # Errors
///
/// [`FeedError::MissingTrainNumber`] if the record cannot be attributed to a
/// train.
pub fn assemble_trip(
    ctx: &mut BuildContext<'_>,
    file: &RawTrainFile,
) -> Result<TripOutcome, FeedError> {
    let train = file.train_number()?;
    let Some(schedule) = file.record.schedule() else {
        ctx.summary.records_empty += 1;
        debug!(train, "Record has no schedule");
        return Ok(TripOutcome::NoSchedule);
    };

    let ordered = order_stops(schedule);
    let ties = order_ties(&ordered);
    if ties > 0 {
        warn!(train, ties, "Stations share an order number, keeping source order");
        ctx.summary.station_order_ties += ties;
    }

    let times = reconcile_stops(&ordered);

    let mut kept_ids = Vec::with_capacity(ordered.len());
    let mut kept_times = Vec::with_capacity(ordered.len());
    for (stop, t) in ordered.iter().zip(times) {
        match ctx.registry.resolve(stop.raw.primary_code(), stop.raw.name()) {
            Some(stop_id) => {
                kept_ids.push(stop_id);
                kept_times.push(t);
            }
            None => ctx.summary.stop_times_dropped_missing_coords += 1,
        }
    }
    strip_boundaries(&mut kept_times);

    let trip_id = ctx.trip_id(train);
    let stop_times: Vec<StopTime> = kept_ids
        .into_iter()
        .zip(kept_times)
        .enumerate()
        .map(|(seq, (stop_id, t))| StopTime {
            trip_id: trip_id.clone(),
            arrival_time: t.arrival,
            departure_time: t.departure,
            stop_id,
            stop_sequence: seq as u32,
        })
        .collect();
    let kept = stop_times.len();

    let origin = schedule
        .origin_label()
        .or_else(|| ordered.first().and_then(|s| s.raw.name()))
        .unwrap_or_default()
        .to_string();
    let destination = schedule
        .destination_label()
        .or_else(|| ordered.last().and_then(|s| s.raw.name()))
        .unwrap_or_default()
        .to_string();

    match AssembledTrip::new(trip_id, train.to_string(), origin, destination, stop_times) {
        Some(trip) => Ok(TripOutcome::Assembled(trip)),
        None => {
            ctx.summary.trips_dropped_min_stops += 1;
            debug!(train, kept, raw = ordered.len(), "Trip dropped, too few stops with coordinates");
            Ok(TripOutcome::TooFewStops { kept })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgencyConfig;
    use crate::coordinates::CoordinateTable;
    use crate::parser::parse_record;
    use crate::timing::GtfsTime;
    use std::path::PathBuf;

    fn coords() -> CoordinateTable {
        let csv = "location_name,lat,lon\nA,45.0,9.0\nB,44.0,11.0\nC,41.9,12.5\n";
        CoordinateTable::from_reader(csv.as_bytes()).unwrap()
    }

    fn config() -> BuildConfig {
        BuildConfig::new("20260301", Some("20260301"), AgencyConfig::default()).unwrap()
    }

    fn file(json: &str) -> RawTrainFile {
        RawTrainFile {
            path: PathBuf::from("raw/9901.json"),
            record: parse_record(json.as_bytes()).unwrap(),
        }
    }

    fn assemble(json: &str) -> (TripOutcome, BuildSummary) {
        let coords = coords();
        let config = config();
        let mut ctx = BuildContext::new(&config, StopRegistry::new(&coords));
        let outcome = assemble_trip(&mut ctx, &file(json)).unwrap();
        (outcome, ctx.summary)
    }

    fn hhmmss(t: Option<GtfsTime>) -> Option<String> {
        t.map(|t| t.to_string())
    }

    #[test]
    fn test_overnight_example() {
        let (outcome, _) = assemble(
            r#"{"TrainSchedule": {"StazioniFerme": [
                {"StationNumber": 1, "LocationDescription": "A", "EstimatedArrivalTime": "23:50", "EstimatedDepartureTime": "23:55"},
                {"StationNumber": 2, "LocationDescription": "B", "EstimatedArrivalTime": "00:10", "EstimatedDepartureTime": "00:15"}
            ]}}"#,
        );
        let TripOutcome::Assembled(trip) = outcome else {
            panic!("expected a trip");
        };
        let st = trip.stop_times();
        assert_eq!(trip.trip_id(), "T_9901_20260301");
        assert_eq!(hhmmss(st[0].arrival_time), None);
        assert_eq!(hhmmss(st[0].departure_time).as_deref(), Some("23:55:00"));
        assert_eq!(hhmmss(st[1].arrival_time).as_deref(), Some("24:10:00"));
        assert_eq!(hhmmss(st[1].departure_time), None);
    }

    #[test]
    fn test_missing_middle_coordinate_reindexes() {
        let (outcome, summary) = assemble(
            r#"{"TrainSchedule": {"StazioniFerme": [
                {"StationNumber": 1, "LocationDescription": "A", "EstimatedDepartureTime": "08:00"},
                {"StationNumber": 2, "LocationDescription": "Nowhere", "EstimatedArrivalTime": "09:00", "EstimatedDepartureTime": "09:05"},
                {"StationNumber": 3, "LocationDescription": "C", "EstimatedArrivalTime": "10:00"}
            ]}}"#,
        );
        let TripOutcome::Assembled(trip) = outcome else {
            panic!("expected a trip");
        };
        let seqs: Vec<_> = trip.stop_times().iter().map(|s| s.stop_sequence).collect();
        let ids: Vec<_> = trip.stop_times().iter().map(|s| s.stop_id.as_str()).collect();
        assert_eq!(seqs, vec![0, 1]);
        assert_eq!(ids, vec!["STOP_A", "STOP_C"]);
        assert_eq!(summary.stop_times_dropped_missing_coords, 1);
    }

    #[test]
    fn test_single_surviving_stop_drops_trip() {
        let (outcome, summary) = assemble(
            r#"{"TrainSchedule": {"StazioniFerme": [
                {"StationNumber": 1, "LocationDescription": "A", "EstimatedDepartureTime": "08:00"},
                {"StationNumber": 2, "LocationDescription": "Nowhere", "EstimatedArrivalTime": "09:00"}
            ]}}"#,
        );
        assert_eq!(outcome, TripOutcome::TooFewStops { kept: 1 });
        assert_eq!(summary.trips_dropped_min_stops, 1);
        assert_eq!(summary.stop_times_dropped_missing_coords, 1);
    }

    #[test]
    fn test_boundaries_follow_kept_stops() {
        // the raw origin has no coordinate, so B becomes the first kept stop
        let (outcome, _) = assemble(
            r#"{"TrainSchedule": {
                "StazionePartenza": {"StationNumber": 0, "LocationDescription": "Nowhere", "EstimatedDepartureTime": "07:00"},
                "StazioniFerme": [
                    {"StationNumber": 1, "LocationDescription": "B", "EstimatedArrivalTime": "08:00", "EstimatedDepartureTime": "08:05"},
                    {"StationNumber": 2, "LocationDescription": "C", "EstimatedArrivalTime": "09:00", "EstimatedDepartureTime": "09:05"}
                ]}}"#,
        );
        let TripOutcome::Assembled(trip) = outcome else {
            panic!("expected a trip");
        };
        let st = trip.stop_times();
        assert_eq!(st[0].arrival_time, None);
        assert_eq!(hhmmss(st[0].departure_time).as_deref(), Some("08:05:00"));
        assert_eq!(st[1].departure_time, None);
    }

    #[test]
    fn test_order_by_station_number_then_insertion() {
        let record = parse_record(
            br#"{"TrainSchedule": {
                "StazionePartenza": {"StationNumber": 1, "LocationDescription": "A"},
                "StazioniFerme": [
                    {"StationNumber": 5, "LocationDescription": "C"},
                    {"LocationDescription": "Z"},
                    {"StationNumber": 3, "LocationDescription": "B"}
                ],
                "StazioniNonFerme": [
                    {"StationNumber": 3, "LocationDescription": "B2"},
                    {"LocationDescription": "Z2"}
                ]}}"#,
        )
        .unwrap();
        let schedule = record.schedule().unwrap();
        let ordered = order_stops(schedule);
        let names: Vec<_> = ordered.iter().filter_map(|s| s.raw.name()).collect();
        assert_eq!(names, vec!["A", "B", "B2", "C", "Z", "Z2"]);
        assert_eq!(order_ties(&ordered), 1);
    }

    #[test]
    fn test_unnumbered_stops_do_not_count_as_ties() {
        let record = parse_record(
            br#"{"TrainSchedule": {"StazioniFerme": [
                {"LocationDescription": "X"}, {"LocationDescription": "Y"}
            ]}}"#,
        )
        .unwrap();
        let ordered = order_stops(record.schedule().unwrap());
        assert_eq!(order_ties(&ordered), 0);
    }

    #[test]
    fn test_rollover_sees_dropped_stops() {
        // the dropped middle stop carries the only pre-midnight arrival, so the
        // arrival at C is still recognised as next-day
        let (outcome, _) = assemble(
            r#"{"TrainSchedule": {"StazioniFerme": [
                {"StationNumber": 1, "LocationDescription": "A", "EstimatedDepartureTime": "22:00"},
                {"StationNumber": 2, "LocationDescription": "Nowhere", "EstimatedArrivalTime": "23:30", "EstimatedDepartureTime": "23:35"},
                {"StationNumber": 3, "LocationDescription": "C", "EstimatedArrivalTime": "00:40"}
            ]}}"#,
        );
        let TripOutcome::Assembled(trip) = outcome else {
            panic!("expected a trip");
        };
        assert_eq!(
            hhmmss(trip.stop_times()[1].arrival_time).as_deref(),
            Some("24:40:00")
        );
    }

    #[test]
    fn test_empty_record() {
        let (outcome, summary) = assemble(r#"{"IsEmpty": true}"#);
        assert_eq!(outcome, TripOutcome::NoSchedule);
        assert_eq!(summary.records_empty, 1);
    }

    #[test]
    fn test_route_labels() {
        let (outcome, _) = assemble(
            r#"{"TrainSchedule": {
                "ArrivalStationDescription": "Napoli Centrale",
                "StazioniFerme": [
                    {"StationNumber": 1, "LocationDescription": "A", "EstimatedDepartureTime": "08:00"},
                    {"StationNumber": 2, "LocationDescription": "B", "EstimatedArrivalTime": "09:00"}
                ]}}"#,
        );
        let TripOutcome::Assembled(trip) = outcome else {
            panic!("expected a trip");
        };
        assert_eq!(trip.origin(), "A");
        assert_eq!(trip.destination(), "Napoli Centrale");
        assert_eq!(trip.route_id(), "R_9901");
    }

    #[test]
    fn test_missing_train_number_is_fatal() {
        let coords = coords();
        let config = config();
        let mut ctx = BuildContext::new(&config, StopRegistry::new(&coords));
        let file = RawTrainFile {
            path: PathBuf::from("raw/.json"),
            record: parse_record(br#"{"TrainSchedule": {}}"#).unwrap(),
        };
        assert!(matches!(
            assemble_trip(&mut ctx, &file),
            Err(FeedError::MissingTrainNumber(_))
        ));
    }
}
