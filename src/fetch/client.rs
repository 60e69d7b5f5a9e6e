use async_trait::async_trait;
use reqwest::{Request, Response};

/// Executes HTTP requests. Implemented by concrete clients and by wrappers
/// that decorate requests before delegating.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
