use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::services::schedule_api::ScheduleApi;
use rail_gtfs::fetch::{HttpClient, fetch_bytes};
use rail_gtfs::parser::parse_record;

pub const TRAIN_URL_TEMPLATE: &str =
    "https://italoinviaggio.italotreno.com/api/RicercaTrenoService?&TrainNumber={train}";

/// Client for the Italo train-status endpoint.
pub struct ItaloClient<C> {
    http: C,
    url_template: String,
    retries: u32,
}

impl<C: HttpClient> ItaloClient<C> {
    pub fn new(http: C, retries: u32) -> Self {
        Self {
            http,
            url_template: TRAIN_URL_TEMPLATE.to_string(),
            retries,
        }
    }

    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = template.into();
        self
    }

    pub fn train_url(&self, train: &str) -> String {
        self.url_template.replace("{train}", train)
    }
}

/// Delay after failed attempt `attempt` (0-based).
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(400 + 500 * u64::from(attempt))
}

#[async_trait]
impl<C: HttpClient> ScheduleApi for ItaloClient<C> {
    async fn fetch_train(&self, train: &str) -> Result<Vec<u8>> {
        let url = self.train_url(train);
        let mut last_err = anyhow!("no attempt made");

        for attempt in 0..=self.retries {
            let result = fetch_bytes(&self.http, &url).await.and_then(|bytes| {
                // a body that is not a record is retried like a transport error
                parse_record(&bytes)?;
                Ok(bytes)
            });
            match result {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    debug!(train, attempt, error = %e, "Train request failed");
                    last_err = e;
                    tokio::time::sleep(backoff(attempt)).await;
                }
            }
        }

        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rail_gtfs::fetch::BasicClient;

    #[test]
    fn test_train_url() {
        let client = ItaloClient::new(BasicClient::new(), 2);
        assert_eq!(
            client.train_url("9901"),
            "https://italoinviaggio.italotreno.com/api/RicercaTrenoService?&TrainNumber=9901"
        );

        let client = client.with_url_template("http://localhost/{train}.json");
        assert_eq!(client.train_url("8101"), "http://localhost/8101.json");
    }

    #[test]
    fn test_backoff_grows_linearly() {
        assert_eq!(backoff(0), Duration::from_millis(400));
        assert_eq!(backoff(1), Duration::from_millis(900));
        assert_eq!(backoff(2), Duration::from_millis(1400));
    }
}
