use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("No raw train records found in {0}")]
    NoRawRecords(PathBuf),
    #[error("Raw record has no train number: {0}")]
    MissingTrainNumber(String),
    #[error("Invalid service date {0:?}, expected YYYYMMDD")]
    InvalidServiceDate(String),
    #[error("Archive has no {0}")]
    MissingArchiveEntry(String),
    #[error("Coordinate table has no location name column (headers: {0})")]
    InvalidCoordinateTable(String),
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("No run directories found under {0}")]
    NoRunDirectories(PathBuf),
    #[error("Invalid train number slice: {0}")]
    InvalidSlice(String),
    #[error("Expected routes need departure and arrival columns (headers: {0})")]
    InvalidExpectedRoutes(String),
}
