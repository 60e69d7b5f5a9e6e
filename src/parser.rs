//! JSON parser for raw per-train schedule snapshots.
//!
//! The operator API reports one object per train number. Field types drift
//! between snapshots (order numbers arrive as integers or strings, codes as
//! strings or numbers, arrays as `null`), so the leaf fields are decoded
//! leniently and anything unusable becomes `None`.

use flate2::read::GzDecoder;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::io::Read;

use crate::error::FeedError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Top-level API response for one train number.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawTrainRecord {
    #[serde(default)]
    pub is_empty: Option<bool>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub last_update: Option<String>,
    #[serde(default)]
    pub train_schedule: Option<TrainSchedule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrainSchedule {
    #[serde(default, deserialize_with = "lenient_text")]
    pub train_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub departure_station: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub departure_station_description: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub arrival_station: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub arrival_station_description: Option<String>,
    #[serde(default)]
    pub stazione_partenza: Option<RawStop>,
    #[serde(default)]
    pub stazioni_ferme: Option<Vec<Option<RawStop>>>,
    #[serde(default)]
    pub stazioni_non_ferme: Option<Vec<Option<RawStop>>>,
}

/// One stop observation as reported by the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawStop {
    #[serde(default, deserialize_with = "lenient_text")]
    pub location_description: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub location_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub rfi_location_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_order")]
    pub station_number: Option<i64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub estimated_arrival_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub estimated_departure_time: Option<String>,
}

impl RawStop {
    /// `{}` placeholders carry no stop.
    pub fn is_blank(&self) -> bool {
        *self == RawStop::default()
    }

    /// Display name, trimmed; `None` if blank.
    pub fn name(&self) -> Option<&str> {
        non_blank(self.location_description.as_deref())
    }

    /// The code used as the stop identity key.
    pub fn primary_code(&self) -> Option<&str> {
        non_blank(self.location_code.as_deref())
    }
}

impl RawTrainRecord {
    /// The schedule payload, or `None` for responses flagged empty or
    /// carrying no schedule.
    pub fn schedule(&self) -> Option<&TrainSchedule> {
        if self.is_empty.unwrap_or(false) {
            return None;
        }
        self.train_schedule.as_ref()
    }
}

impl TrainSchedule {
    /// Origin, then scheduled stops, then pass-through stops, in source order.
    pub fn raw_stops(&self) -> impl Iterator<Item = &RawStop> {
        let ferme = self.stazioni_ferme.iter().flatten().flatten();
        let non_ferme = self.stazioni_non_ferme.iter().flatten().flatten();
        self.stazione_partenza
            .iter()
            .chain(ferme)
            .chain(non_ferme)
            .filter(|s| !s.is_blank())
    }

    /// Every display name the schedule mentions, including the declared
    /// arrival station which is sometimes missing from the stop arrays.
    pub fn station_names(&self) -> impl Iterator<Item = &str> {
        self.raw_stops()
            .filter_map(RawStop::name)
            .chain(non_blank(self.arrival_station_description.as_deref()))
    }

    pub fn train_number(&self) -> Option<&str> {
        non_blank(self.train_number.as_deref())
    }

    pub fn origin_label(&self) -> Option<&str> {
        non_blank(self.departure_station_description.as_deref())
    }

    pub fn destination_label(&self) -> Option<&str> {
        non_blank(self.arrival_station_description.as_deref())
    }
}

/// Decodes a raw record from JSON bytes, transparently gunzipping.
///
/// # Errors
///
/// Returns an error if the bytes are not (gzip-compressed) JSON of the
/// expected shape.
pub fn parse_record(bytes: &[u8]) -> Result<RawTrainRecord, FeedError> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoded = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut decoded)?;
        return Ok(serde_json::from_slice(&decoded)?);
    }
    Ok(serde_json::from_slice(bytes)?)
}

pub(crate) fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_order<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
