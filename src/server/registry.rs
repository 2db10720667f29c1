//! Single-slot webhook registry held by the simulator server.

use std::sync::RwLock;
use std::time::Duration;

use reqwest::{Client, Url};
use serde::Deserialize;
use thiserror::Error;

use crate::status::StatusReport;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("invalid webhook request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid webhook url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    url: String,
}

/// Result of one notification attempt. Only used for logging and tests;
/// the timer callback never acts on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    NoWebhook,
    Delivered(u16),
    Failed(String),
}

/// Holds at most one callback URL. A new registration replaces the old one.
pub struct WebhookRegistry {
    // Last writer wins; None until the first valid registration.
    url: RwLock<Option<Url>>,
    client: Client,
}

impl WebhookRegistry {
    pub fn new(notify_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(notify_timeout)
            .timeout(notify_timeout)
            .build()?;
        Ok(Self {
            url: RwLock::new(None),
            client,
        })
    }

    /// Decodes a `{"url": "..."}` body and registers it. Nothing is stored
    /// unless the body and the URL are both valid.
    pub fn register_body(&self, body: &[u8]) -> Result<Url, RegistrationError> {
        let req: RegisterRequest = serde_json::from_slice(body)?;
        let url = parse_callback_url(&req.url)?;
        self.register(url.clone());
        Ok(url)
    }

    /// Replaces any previous registration.
    pub fn register(&self, url: Url) {
        tracing::info!(%url, "registered webhook url");
        let mut slot = self.url.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(url);
    }

    pub fn current(&self) -> Option<Url> {
        self.url.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Best-effort POST of `report` to the registered URL. Failures are
    /// logged and swallowed.
    pub async fn notify(&self, report: StatusReport) -> NotifyOutcome {
        let Some(url) = self.current() else {
            tracing::info!("no webhook url registered");
            return NotifyOutcome::NoWebhook;
        };

        match self.client.post(url.clone()).json(&report).send().await {
            Ok(resp) => {
                let code = resp.status();
                if code.is_success() {
                    tracing::info!(%url, status = %code, "webhook notification sent");
                } else {
                    tracing::warn!(%url, status = %code, "webhook endpoint rejected notification");
                }
                NotifyOutcome::Delivered(code.as_u16())
            }
            Err(err) => {
                tracing::warn!(%url, error = %err, "failed to notify webhook");
                NotifyOutcome::Failed(err.to_string())
            }
        }
    }
}

fn parse_callback_url(raw: &str) -> Result<Url, RegistrationError> {
    let url = Url::parse(raw).map_err(|e| RegistrationError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(RegistrationError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}
