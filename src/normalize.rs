//! Per-train normalized schedules: ordered, rollover-reconciled timelines
//! written as JSON before any coordinate filtering.

use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::assembler::{order_stops, reconcile_stops};
use crate::error::FeedError;
use crate::input::{list_record_files, read_record, train_stem};
use crate::output::write_json;
use crate::parser::{RawTrainRecord, non_blank};
use crate::timing::{GtfsTime, strip_boundaries};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedStop {
    /// Station-order number, or the timeline position when the source has none.
    pub stop_sequence: i64,
    pub stop_name: Option<String>,
    pub location_code: Option<String>,
    pub rfi_location_code: Option<String>,
    pub arrival_time: Option<GtfsTime>,
    pub departure_time: Option<GtfsTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedTrain {
    pub train_number: String,
    pub last_update: Option<String>,
    pub captured_utc: String,
    pub origin_station: Option<String>,
    pub destination_station: Option<String>,
    pub origin_code: Option<String>,
    pub destination_code: Option<String>,
    pub stops: Vec<NormalizedStop>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeSummary {
    pub normalized: usize,
    pub skipped_empty: usize,
    pub skipped_nonjson: usize,
}

fn owned(s: Option<&str>) -> Option<String> {
    non_blank(s).map(str::to_string)
}

/// Normalizes one record. `None` when it carries no schedule.
pub fn normalize_record(
    train: &str,
    record: &RawTrainRecord,
    captured_utc: &str,
) -> Option<NormalizedTrain> {
    let schedule = record.schedule()?;
    let ordered = order_stops(schedule);
    let mut times = reconcile_stops(&ordered);
    strip_boundaries(&mut times);

    let stops = ordered
        .iter()
        .zip(times)
        .enumerate()
        .map(|(i, (stop, t))| NormalizedStop {
            stop_sequence: stop.station_order.unwrap_or(i as i64),
            stop_name: owned(stop.raw.name()),
            location_code: owned(stop.raw.primary_code()),
            rfi_location_code: owned(stop.raw.rfi_location_code.as_deref()),
            arrival_time: t.arrival,
            departure_time: t.departure,
        })
        .collect();

    Some(NormalizedTrain {
        train_number: train.to_string(),
        last_update: record.last_update.clone(),
        captured_utc: captured_utc.to_string(),
        origin_station: owned(schedule.origin_label()),
        destination_station: owned(schedule.destination_label()),
        origin_code: owned(schedule.departure_station.as_deref()),
        destination_code: owned(schedule.arrival_station.as_deref()),
        stops,
    })
}

/// Normalizes every snapshot in `input_dir` into `output_dir`, finishing with
/// a `_summary.json` of counts.
#[tracing::instrument(skip_all, fields(input = %input_dir.display(), output = %output_dir.display()))]
pub fn normalize_dir(
    input_dir: &Path,
    output_dir: &Path,
    captured_utc: &str,
) -> Result<NormalizeSummary, FeedError> {
    std::fs::create_dir_all(output_dir)?;
    let mut summary = NormalizeSummary::default();

    for path in list_record_files(input_dir)? {
        let Some(stem) = train_stem(&path) else {
            continue;
        };
        let file = match read_record(&path) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping undecodable snapshot");
                summary.skipped_nonjson += 1;
                continue;
            }
        };
        let train = file.train_number().unwrap_or(stem);

        match normalize_record(train, &file.record, captured_utc) {
            Some(normalized) => {
                write_json(&output_dir.join(format!("{stem}.normalized.json")), &normalized)?;
                summary.normalized += 1;
            }
            None => {
                debug!(train, "No schedule to normalize");
                summary.skipped_empty += 1;
            }
        }
    }

    write_json(&output_dir.join("_summary.json"), &summary)?;
    info!(
        normalized = summary.normalized,
        skipped_empty = summary.skipped_empty,
        skipped_nonjson = summary.skipped_nonjson,
        "Normalization finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_record;
    use std::env;
    use std::fs;

    const OVERNIGHT: &str = r#"{"LastUpdate": "2026-03-01T21:00:00", "TrainSchedule": {
        "TrainNumber": "8101",
        "DepartureStation": "TPN",
        "DepartureStationDescription": "Torino Porta Nuova",
        "ArrivalStation": "SA_",
        "ArrivalStationDescription": "Salerno",
        "StazionePartenza": {"StationNumber": 0, "LocationCode": "TPN", "LocationDescription": "Torino Porta Nuova", "EstimatedArrivalTime": "01:00", "EstimatedDepartureTime": "23:00"},
        "StazioniFerme": [
            {"StationNumber": 2, "LocationCode": "SA_", "LocationDescription": "Salerno", "EstimatedArrivalTime": "04:00", "EstimatedDepartureTime": "01:00"},
            {"StationNumber": 1, "LocationDescription": "Roma Termini", "EstimatedArrivalTime": "23:50", "EstimatedDepartureTime": "00:10"}
        ]}}"#;

    #[test]
    fn test_normalize_record_orders_and_reconciles() {
        let record = parse_record(OVERNIGHT.as_bytes()).unwrap();
        let train = normalize_record("8101", &record, "20260301T210000Z").unwrap();

        assert_eq!(train.origin_code.as_deref(), Some("TPN"));
        assert_eq!(train.destination_station.as_deref(), Some("Salerno"));
        assert_eq!(train.last_update.as_deref(), Some("2026-03-01T21:00:00"));

        let names: Vec<_> = train.stops.iter().map(|s| s.stop_name.as_deref()).collect();
        assert_eq!(
            names,
            vec![Some("Torino Porta Nuova"), Some("Roma Termini"), Some("Salerno")]
        );

        let first = &train.stops[0];
        assert_eq!(first.arrival_time, None);
        assert_eq!(first.departure_time.map(|t| t.to_string()).as_deref(), Some("23:00:00"));

        let middle = &train.stops[1];
        assert_eq!(middle.location_code, None);
        assert_eq!(middle.arrival_time.map(|t| t.to_string()).as_deref(), Some("23:50:00"));
        assert_eq!(middle.departure_time.map(|t| t.to_string()).as_deref(), Some("24:10:00"));

        let last = &train.stops[2];
        assert_eq!(last.stop_sequence, 2);
        assert_eq!(last.arrival_time.map(|t| t.to_string()).as_deref(), Some("28:00:00"));
        assert_eq!(last.departure_time, None);
    }

    #[test]
    fn test_missing_order_uses_position() {
        let record = parse_record(
            br#"{"TrainSchedule": {"StazioniFerme": [
                {"LocationDescription": "A"},
                {"LocationDescription": "B"}
            ]}}"#,
        )
        .unwrap();
        let train = normalize_record("1", &record, "x").unwrap();
        let seqs: Vec<_> = train.stops.iter().map(|s| s.stop_sequence).collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[test]
    fn test_empty_record_is_none() {
        let record = parse_record(br#"{"IsEmpty": true, "TrainSchedule": {}}"#).unwrap();
        assert!(normalize_record("1", &record, "x").is_none());
    }

    #[test]
    fn test_normalize_dir() {
        let root = env::temp_dir().join("rail_gtfs_normalize_dir");
        let _ = fs::remove_dir_all(&root);
        let input = root.join("raw");
        fs::create_dir_all(&input).unwrap();
        fs::write(input.join("8101.json"), OVERNIGHT).unwrap();
        fs::write(input.join("9999.json"), r#"{"IsEmpty": true}"#).unwrap();
        fs::write(input.join("1234.json"), "<html>").unwrap();
        fs::write(input.join("_summary.json"), "{}").unwrap();

        let output = root.join("normalized");
        let summary = normalize_dir(&input, &output, "20260301T210000Z").unwrap();
        assert_eq!(
            summary,
            NormalizeSummary { normalized: 1, skipped_empty: 1, skipped_nonjson: 1 }
        );

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(output.join("8101.normalized.json")).unwrap())
                .unwrap();
        assert_eq!(written["train_number"], "8101");
        assert_eq!(written["stops"][0]["arrival_time"], serde_json::Value::Null);
        assert_eq!(written["stops"][2]["arrival_time"], "28:00:00");

        let counts: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(output.join("_summary.json")).unwrap())
                .unwrap();
        assert_eq!(counts["normalized"], 1);

        fs::remove_dir_all(&root).unwrap();
    }
}
