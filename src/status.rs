//! Job status vocabulary shared by the simulator server and the client.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Lifecycle status of the simulated job.
///
/// `Completed` and `Error` are terminal. The simulator only ever produces
/// `Completed`; `Error` is accepted from the wire and treated as terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Completed,
    Error,
}

impl JobStatus {
    /// `completed` and `error` end the job; `pending` does not.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Wire body for `GET /status` responses and webhook notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: JobStatus,
}

impl StatusReport {
    pub fn new(status: JobStatus) -> Self {
        Self { status }
    }
}

/// Last observed status on the client, written by both detection paths.
///
/// Last writer wins; no ordering is imposed between the webhook and the
/// poller beyond each write being atomic.
#[derive(Debug, Default)]
pub struct StatusCache {
    latest: Mutex<Option<JobStatus>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, status: JobStatus) {
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        *latest = Some(status);
    }

    /// `None` until the first observation.
    pub fn get(&self) -> Option<JobStatus> {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }
}
