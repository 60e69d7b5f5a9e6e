//! Trait for sources of raw per-train schedule snapshots.

use anyhow::Result;

/// Abstraction over an operator's train-status endpoint.
#[async_trait::async_trait]
pub trait ScheduleApi: Send + Sync {
    /// Returns the raw JSON body reported for one train number.
    async fn fetch_train(&self, train: &str) -> Result<Vec<u8>>;
}
