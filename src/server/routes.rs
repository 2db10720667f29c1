//! HTTP surface of the simulator: `GET /status`, `POST /register-webhook`
//! and `GET /health`.
//!
//! Handlers stay thin. Session semantics live in [`super::job`] and
//! registration rules in [`super::registry`].

use std::sync::{Arc, OnceLock};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use super::job::{DelayRange, JobSession};
use super::registry::WebhookRegistry;
use crate::error::ApiError;
use crate::status::StatusReport;

/// Shared server state. The job session is created by the first request
/// that needs it and lives for the rest of the process.
#[derive(Clone)]
pub struct AppState {
    registry: Arc<WebhookRegistry>,
    session: Arc<OnceLock<Arc<JobSession>>>,
    delay: DelayRange,
}

impl AppState {
    pub fn new(registry: Arc<WebhookRegistry>, delay: DelayRange) -> Self {
        Self {
            registry,
            session: Arc::new(OnceLock::new()),
            delay,
        }
    }

    pub fn registry(&self) -> &Arc<WebhookRegistry> {
        &self.registry
    }

    /// The job session, created on first access.
    pub fn session(&self) -> &Arc<JobSession> {
        self.session
            .get_or_init(|| JobSession::new(self.delay, Arc::clone(&self.registry)))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn job_status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state.session();
    let status = session.query_status();
    tracing::debug!(job = %session.id(), %status, "status queried");
    let body = serde_json::to_value(StatusReport::new(status))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(body))
}

async fn register_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    state.registry.register_body(&body).map_err(|e| {
        tracing::warn!(error = %e, "rejected webhook registration");
        ApiError::BadRequest(e.to_string())
    })?;
    Ok(StatusCode::OK)
}

/// Builds the simulator router. Tracing layers are added by the caller.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(job_status))
        .route("/register-webhook", post(register_webhook))
        .with_state(state)
}
