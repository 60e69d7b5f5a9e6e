//! Coverage reports written as CSV plus a Markdown digest.

pub mod routes;
pub mod stops;

use csv::WriterBuilder;
use std::path::Path;

use crate::error::FeedError;

/// Sorts names case-insensitively, exact order breaking ties.
pub(crate) fn sort_casefold(names: &mut [String]) {
    names.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)));
}

pub(crate) fn write_csv_rows<const N: usize>(
    path: &Path,
    header: [&str; N],
    rows: &[[String; N]],
) -> Result<(), FeedError> {
    let mut wtr = WriterBuilder::new().from_path(path)?;
    wtr.write_record(header)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}
