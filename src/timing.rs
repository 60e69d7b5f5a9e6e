//! Clock-face time parsing and midnight rollover reconciliation.
//!
//! Source schedules report `HH:MM` estimates with no day marker. A trip that
//! runs past midnight therefore shows times going backwards; these helpers
//! turn such sequences into absolute minute offsets from the start of the
//! service day, which GTFS expresses as `HH:MM:SS` with `HH` allowed past 24.

use serde::{Serialize, Serializer};
use std::fmt;

pub const MINUTES_PER_DAY: u32 = 1440;

/// Minutes since the start of the service day. May exceed one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GtfsTime(u32);

impl GtfsTime {
    pub fn from_minutes(minutes: u32) -> Self {
        Self(minutes)
    }

    pub fn minutes(self) -> u32 {
        self.0
    }
}

impl fmt::Display for GtfsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:00", self.0 / 60, self.0 % 60)
    }
}

impl Serialize for GtfsTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Reconciled arrival/departure for one stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopTimes {
    pub arrival: Option<GtfsTime>,
    pub departure: Option<GtfsTime>,
}

/// Parses a strict `HH:MM` 24-hour clock string into minutes since midnight.
///
/// Anything else, including out-of-range fields, is treated as absent.
pub fn parse_hhmm(s: Option<&str>) -> Option<u32> {
    let bytes = s?.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return None;
    }
    let digits = [bytes[0], bytes[1], bytes[3], bytes[4]];
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let hh = u32::from(digits[0] - b'0') * 10 + u32::from(digits[1] - b'0');
    let mm = u32::from(digits[2] - b'0') * 10 + u32::from(digits[3] - b'0');
    if hh >= 24 || mm >= 60 {
        return None;
    }
    Some(hh * 60 + mm)
}

/// Walks a sequence of clock minutes in stop order, adding a day each time
/// the clock goes backwards. Absent values pass through untouched and do not
/// take part in the comparison.
pub fn infer_rollover(times: &[Option<u32>]) -> Vec<Option<u32>> {
    let mut offset = 0;
    let mut prev: Option<u32> = None;

    times
        .iter()
        .map(|t| {
            let t = (*t)?;
            let mut value = t + offset;
            if prev.is_some_and(|p| value < p) {
                offset += MINUTES_PER_DAY;
                value = t + offset;
            }
            prev = Some(value);
            Some(value)
        })
        .collect()
}

/// Reconciles raw `(arrival, departure)` clock strings for a trip in stop order.
///
/// Arrivals and departures roll over independently. A stop whose departure
/// still precedes its own arrival gets one extra day on that departure only.
pub fn reconcile(clock: &[(Option<&str>, Option<&str>)]) -> Vec<StopTimes> {
    let arrivals: Vec<_> = clock.iter().map(|(a, _)| parse_hhmm(*a)).collect();
    let departures: Vec<_> = clock.iter().map(|(_, d)| parse_hhmm(*d)).collect();

    let arrivals = infer_rollover(&arrivals);
    let departures = infer_rollover(&departures);

    arrivals
        .into_iter()
        .zip(departures)
        .map(|(arrival, departure)| {
            let departure = match (arrival, departure) {
                (Some(a), Some(d)) if d < a => Some(d + MINUTES_PER_DAY),
                _ => departure,
            };
            StopTimes {
                arrival: arrival.map(GtfsTime::from_minutes),
                departure: departure.map(GtfsTime::from_minutes),
            }
        })
        .collect()
}

/// Origin stops never report an arrival and terminal stops never report a
/// departure; source values there are placeholders.
pub fn strip_boundaries(times: &mut [StopTimes]) {
    if let Some(first) = times.first_mut() {
        first.arrival = None;
    }
    if let Some(last) = times.last_mut() {
        last.departure = None;
    }
}
