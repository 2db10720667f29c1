//! jobwatch configuration loaded from `jobwatch.toml`.
//!
//! [`JobwatchConfig`] holds every tunable of both the simulator server and
//! the arbitration client. Missing keys fall back to defaults; a handful of
//! environment variables take precedence over the file, and CLI flags take
//! precedence over both (applied in `main`).

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::client::{PollSchedule, RegistrationPolicy};
use crate::error::ConfigError;
use crate::server::DelayRange;

pub const CONFIG_FILE: &str = "jobwatch.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobwatchConfig {
    /// Bind host of the simulator server.
    pub server_host: String,
    /// Bind port of the simulator server.
    pub server_port: u16,

    /// Base URL the client uses to reach the simulator.
    pub server_url: String,
    /// Bind host of the client's webhook listener.
    pub webhook_host: String,
    /// Bind port of the client's webhook listener. `0` picks an ephemeral port.
    pub webhook_port: u16,
    /// Host name the server should use to call the webhook back.
    pub callback_host: String,

    /// Inclusive job completion delay range, in seconds.
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Timeout for the server's outbound webhook notification.
    pub notify_timeout_secs: u64,

    /// Number of status queries before the poller gives up.
    pub poll_budget: u32,
    pub poll_base_ms: u64,
    pub poll_mid_ms: u64,
    pub poll_fine_ms: u64,

    /// Hard deadline of one resolution, in seconds.
    pub resolve_timeout_secs: u64,
    pub registration: RegistrationPolicy,
}

impl Default for JobwatchConfig {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 8080,
            server_url: "http://localhost:8080".to_string(),
            webhook_host: "0.0.0.0".to_string(),
            webhook_port: 9090,
            callback_host: "localhost".to_string(),
            min_delay_secs: 5,
            max_delay_secs: 15,
            notify_timeout_secs: 10,
            poll_budget: 10,
            poll_base_ms: 4000,
            poll_mid_ms: 2000,
            poll_fine_ms: 1000,
            resolve_timeout_secs: 30,
            registration: RegistrationPolicy::Required,
        }
    }
}

impl JobwatchConfig {
    /// Loads `path` (or `jobwatch.toml` in the current directory), then
    /// applies environment overrides. Uses defaults if the file does not
    /// exist.
    pub fn load_with(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::load_from(path.unwrap_or(Path::new(CONFIG_FILE)))?;
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<JobwatchConfig>(&contents)?)
    }

    /// Applies `JOBWATCH_*` overrides resolved through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("JOBWATCH_SERVER_URL")
            && !url.is_empty()
        {
            self.server_url = url;
        }
        if let Some(port) = lookup("JOBWATCH_WEBHOOK_PORT") {
            self.webhook_port = parse_port("JOBWATCH_WEBHOOK_PORT", port)?;
        }
        if let Some(port) = lookup("JOBWATCH_PORT") {
            self.server_port = parse_port("JOBWATCH_PORT", port)?;
        }
        Ok(())
    }

    /// Rejects a reversed delay range and a zero resolve timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.delay_range()?;
        if self.resolve_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn delay_range(&self) -> Result<DelayRange, ConfigError> {
        DelayRange::from_secs(self.min_delay_secs, self.max_delay_secs)
    }

    /// Backoff intervals from the three `poll_*_ms` settings.
    pub fn poll_schedule(&self) -> PollSchedule {
        PollSchedule {
            base: Duration::from_millis(self.poll_base_ms),
            mid: Duration::from_millis(self.poll_mid_ms),
            fine: Duration::from_millis(self.poll_fine_ms),
        }
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

fn parse_port(var: &'static str, value: String) -> Result<u16, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}
