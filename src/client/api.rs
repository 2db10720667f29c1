//! Client calls against the simulator server.
//!
//! [`StatusApi`] is the seam the poller and the arbiter are written against;
//! [`HttpStatusApi`] is the reqwest implementation used outside tests.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde_json::json;

use crate::error::WatchError;
use crate::status::{JobStatus, StatusReport};

/// The two calls the client makes against the job server.
///
/// Futures must be `Send` so the poller can run on a spawned task.
pub trait StatusApi: Send + Sync + 'static {
    fn fetch_status(&self) -> impl Future<Output = Result<JobStatus, WatchError>> + Send;

    fn register_webhook(
        &self,
        callback_url: &str,
    ) -> impl Future<Output = Result<(), WatchError>> + Send;
}

/// `StatusApi` over HTTP.
pub struct HttpStatusApi {
    client: Client,
    base_url: String,
}

impl HttpStatusApi {
    /// Client with a 5s connect timeout and a 10s request timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self, WatchError> {
        Self::with_timeouts(base_url, Duration::from_secs(5), Duration::from_secs(10))
    }

    pub fn with_timeouts(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, WatchError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Server root without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl StatusApi for HttpStatusApi {
    async fn fetch_status(&self) -> Result<JobStatus, WatchError> {
        let response = self
            .client
            .get(format!("{}/status", self.base_url))
            .send()
            .await?;

        let code = response.status();
        if !code.is_success() {
            return Err(WatchError::UnexpectedStatus {
                status: code.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let report: StatusReport = serde_json::from_slice(&body)?;
        Ok(report.status)
    }

    async fn register_webhook(&self, callback_url: &str) -> Result<(), WatchError> {
        let response = self
            .client
            .post(format!("{}/register-webhook", self.base_url))
            .json(&json!({ "url": callback_url }))
            .send()
            .await
            .map_err(|e| WatchError::Registration(e.to_string()))?;

        let code = response.status();
        if code != reqwest::StatusCode::OK {
            return Err(WatchError::Registration(format!(
                "failed to register webhook, status code: {}",
                code.as_u16()
            )));
        }
        Ok(())
    }
}
