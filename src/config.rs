use chrono::{Days, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// Operator metadata written into `agency.txt` and `feed_info.txt`.
///
/// Can be stored as a JSON object on disk; missing keys take the defaults:
/// ```json
/// {
///   "agency_id": "ITALO",
///   "agency_name": "Italo",
///   "agency_url": "https://www.italotreno.com/",
///   "agency_timezone": "Europe/Rome"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgencyConfig {
    pub agency_id: String,
    pub agency_name: String,
    pub agency_url: String,
    pub agency_timezone: String,
    pub feed_lang: String,
    pub publisher_name: Option<String>,
    pub publisher_url: Option<String>,
}

impl Default for AgencyConfig {
    fn default() -> Self {
        Self {
            agency_id: "ITALO".to_string(),
            agency_name: "Italo".to_string(),
            agency_url: "https://www.italotreno.com/".to_string(),
            agency_timezone: "Europe/Rome".to_string(),
            feed_lang: "it".to_string(),
            publisher_name: None,
            publisher_url: None,
        }
    }
}

impl AgencyConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self, FeedError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn publisher_name(&self) -> &str {
        self.publisher_name.as_deref().unwrap_or(&self.agency_name)
    }

    pub fn publisher_url(&self) -> &str {
        self.publisher_url.as_deref().unwrap_or(&self.agency_url)
    }
}

/// Parameters of one feed-build run.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub service_date: NaiveDate,
    pub run_date: NaiveDate,
    pub agency: AgencyConfig,
}

impl BuildConfig {
    /// `run_date` defaults to today; pin it to reproduce an earlier archive.
    pub fn new(
        service_date: &str,
        run_date: Option<&str>,
        agency: AgencyConfig,
    ) -> Result<Self, FeedError> {
        let service_date = parse_gtfs_date(service_date)?;
        let run_date = match run_date {
            Some(s) => parse_gtfs_date(s)?,
            None => Local::now().date_naive(),
        };
        Ok(Self {
            service_date,
            run_date,
            agency,
        })
    }

    /// Service date as `YYYYMMDD`.
    pub fn service_date_compact(&self) -> String {
        self.service_date.format("%Y%m%d").to_string()
    }

    pub fn service_id(&self) -> String {
        format!("SVC_{}", self.service_date_compact())
    }

    /// Last day of the service window: one year after the run date.
    pub fn service_end_date(&self) -> NaiveDate {
        self.run_date
            .checked_add_days(Days::new(365))
            .unwrap_or(NaiveDate::MAX)
    }
}

/// Parses a `YYYYMMDD` date.
pub fn parse_gtfs_date(s: &str) -> Result<NaiveDate, FeedError> {
    let s = s.trim();
    if s.len() != 8 {
        return Err(FeedError::InvalidServiceDate(s.to_string()));
    }
    NaiveDate::parse_from_str(s, "%Y%m%d").map_err(|_| FeedError::InvalidServiceDate(s.to_string()))
}
