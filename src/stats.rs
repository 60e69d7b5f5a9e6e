use serde::Serialize;
use tracing::info;

/// Run-level counters for one feed build.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub service_date: String,

    // input
    pub records_read: usize,
    pub records_empty: usize,
    pub records_unreadable: usize,
    pub duplicate_trains: usize,

    // assembly
    pub trips_built: usize,
    pub trips_dropped_min_stops: usize,
    pub stop_times_dropped_missing_coords: usize,
    pub station_order_ties: usize,
    pub stop_names_missing_coords: usize,

    // output
    pub stops: usize,
    pub routes: usize,
    pub stop_times: usize,
}

impl BuildSummary {
    pub fn new(service_date: &str) -> Self {
        Self {
            service_date: service_date.to_string(),
            ..Default::default()
        }
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    /// Share of stop observations on retained trips that survived the
    /// coordinate gate.
    pub fn stop_times_kept_pct(&self) -> f64 {
        Self::pct(
            self.stop_times,
            self.stop_times + self.stop_times_dropped_missing_coords,
        )
    }

    /// Share of schedule-bearing records that became trips.
    pub fn trips_kept_pct(&self) -> f64 {
        Self::pct(self.trips_built, self.trips_built + self.trips_dropped_min_stops)
    }

    pub fn log(&self) {
        info!(
            service_date = %self.service_date,
            records_read = self.records_read,
            records_empty = self.records_empty,
            records_unreadable = self.records_unreadable,
            duplicate_trains = self.duplicate_trains,
            trips_built = self.trips_built,
            trips_dropped_min_stops = self.trips_dropped_min_stops,
            stop_times_dropped_missing_coords = self.stop_times_dropped_missing_coords,
            station_order_ties = self.station_order_ties,
            stop_names_missing_coords = self.stop_names_missing_coords,
            stops = self.stops,
            routes = self.routes,
            stop_times = self.stop_times,
            trips_kept_pct = format!("{:.1}", self.trips_kept_pct()),
            stop_times_kept_pct = format!("{:.1}", self.stop_times_kept_pct()),
            "Feed build summary"
        );
    }
}
