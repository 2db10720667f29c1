//! Error types for the client, configuration and the HTTP surfaces.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::client::PhaseError;
use crate::status::JobStatus;

/// Failures surfaced by the client side of a status resolution.
///
/// Single-exchange failures (`Transport`, `Decode`) are normally handled
/// locally by the poller; only budget exhaustion, timeout and registration
/// failure reach the caller of [`Arbiter::resolve`](crate::client::Arbiter::resolve).
#[derive(Debug, Error)]
pub enum WatchError {
    /// Network or connection failure on an HTTP exchange.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// A response or payload could not be decoded.
    #[error("decode failure: {0}")]
    Decode(String),

    /// The server answered with an unexpected HTTP status.
    #[error("server returned status {status}")]
    UnexpectedStatus { status: u16 },

    /// The final poll attempt failed at the transport or decode level.
    #[error("polling failed on final attempt {attempts}: {source}")]
    PollExhausted {
        attempts: u32,
        #[source]
        source: Box<WatchError>,
    },

    /// Every poll succeeded but none reported a terminal status.
    #[error("max retries reached without completion ({attempts} attempts)")]
    RetriesExhausted { attempts: u32 },

    /// The arbitration deadline elapsed before either path reported.
    /// `fallback` is the last cached status, `None` if nothing was observed.
    #[error("timeout waiting for job completion (last known status: {})", display_fallback(.fallback))]
    Timeout { fallback: Option<JobStatus> },

    /// Registering the webhook callback with the server failed.
    #[error("error registering webhook: {0}")]
    Registration(String),

    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_fallback(fallback: &Option<JobStatus>) -> String {
    fallback
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl WatchError {
    /// The non-authoritative status carried by a timeout, if this is one.
    pub fn fallback(&self) -> Option<Option<JobStatus>> {
        match self {
            WatchError::Timeout { fallback } => Some(*fallback),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WatchError::Timeout { .. })
    }
}

impl From<serde_json::Error> for WatchError {
    fn from(err: serde_json::Error) -> Self {
        WatchError::Decode(err.to_string())
    }
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("delay range is reversed: min {min_ms}ms > max {max_ms}ms")]
    ReversedDelayRange { min_ms: u64, max_ms: u64 },

    #[error("resolve timeout must be greater than zero")]
    ZeroTimeout,

    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

/// HTTP-facing error. Renders as `{"error": ..., "code": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        };
        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}
