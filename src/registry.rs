//! Stop deduplication and the coordinate gate.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::coordinates::CoordinateTable;
use crate::gtfs::Stop;
use crate::parser::non_blank;

/// Canonical stops created during one feed build.
///
/// A stop is keyed by its external code, or by its display name when the
/// source gives no code. It is only ever created once its display name has a
/// valid coordinate; after that the key always resolves to the same stop.
#[derive(Debug)]
pub struct StopRegistry<'a> {
    coordinates: &'a CoordinateTable,
    stops: BTreeMap<String, Stop>,
    missing: BTreeSet<String>,
}

impl<'a> StopRegistry<'a> {
    pub fn new(coordinates: &'a CoordinateTable) -> Self {
        Self {
            coordinates,
            stops: BTreeMap::new(),
            missing: BTreeSet::new(),
        }
    }

    /// Returns the stop id for a raw `(code, name)` pair, creating the stop on
    /// first sight. `None` means the stop has no usable coordinate and must be
    /// dropped.
    pub fn resolve(&mut self, code: Option<&str>, name: Option<&str>) -> Option<String> {
        let code = non_blank(code);
        let key = code.or(non_blank(name))?;
        let stop_id = stop_id(key);

        if self.stops.contains_key(&stop_id) {
            return Some(stop_id);
        }

        let stop_name = non_blank(name).unwrap_or(key);
        let entry = self.coordinates.get(stop_name);
        let Some(entry) = entry.filter(|e| e.coordinate().is_some()) else {
            if self.missing.insert(stop_name.to_string()) {
                debug!(stop_name, key, "Stop has no valid coordinate");
            }
            return None;
        };

        self.stops.insert(
            stop_id.clone(),
            Stop {
                stop_id: stop_id.clone(),
                stop_name: stop_name.to_string(),
                stop_lat: entry.lat.clone(),
                stop_lon: entry.lon.clone(),
                stop_code: code.unwrap_or_default().to_string(),
            },
        );
        Some(stop_id)
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn get(&self, stop_id: &str) -> Option<&Stop> {
        self.stops.get(stop_id)
    }

    /// Display names that were looked up and had no valid coordinate.
    pub fn missing_names(&self) -> impl Iterator<Item = &str> {
        self.missing.iter().map(String::as_str)
    }

    /// All stops, ordered by id.
    pub fn into_stops(self) -> Vec<Stop> {
        self.stops.into_values().collect()
    }
}

fn stop_id(key: &str) -> String {
    format!("STOP_{key}")
}
