use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, USER_AGENT};

/// The schedule endpoint rejects requests without a browser-like agent.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0";

/// An [`HttpClient`] wrapper that sets the `User-Agent` header on every
/// request.
pub struct UserAgent<C> {
    pub inner: C,
    pub value: HeaderValue,
}

impl<C> UserAgent<C> {
    pub fn browser(inner: C) -> Self {
        Self {
            inner,
            value: HeaderValue::from_static(BROWSER_USER_AGENT),
        }
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for UserAgent<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut().insert(USER_AGENT, self.value.clone());
        self.inner.execute(req).await
    }
}
