mod basic;
mod client;
mod user_agent;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use user_agent::{BROWSER_USER_AGENT, UserAgent};

use anyhow::Result;

use crate::error::FeedError;

/// GETs `url` and returns the body. Non-success statuses are errors.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}

/// Splits `[range_start, range_end]` into consecutive slices of
/// `slice_size` train numbers and returns slice `slice_index`.
///
/// The index wraps around the slice count, so an ever-increasing counter
/// (an hour number, say) cycles through the whole range.
pub fn build_slice(
    range_start: u32,
    range_end: u32,
    slice_size: u32,
    slice_index: u64,
) -> Result<Vec<u32>, FeedError> {
    if range_end < range_start {
        return Err(FeedError::InvalidSlice(format!(
            "range end {range_end} is before range start {range_start}"
        )));
    }
    if slice_size == 0 {
        return Err(FeedError::InvalidSlice("slice size must be positive".into()));
    }

    let total = u64::from(range_end - range_start) + 1;
    let slices = total.div_ceil(u64::from(slice_size));
    let idx = slice_index % slices;

    let start = u64::from(range_start) + idx * u64::from(slice_size);
    let end = u64::from(range_end).min(start + u64::from(slice_size) - 1);
    Ok((start..=end).filter_map(|n| u32::try_from(n).ok()).collect())
}
