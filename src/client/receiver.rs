//! Push-side detection: a small axum server accepting `POST /webhook`.
//!
//! Valid payloads always update the cache. Only terminal statuses are
//! published to the result slot; malformed bodies get a 400 and change
//! nothing.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use super::race::{Detection, DetectionSource, ResultSlot};
use crate::error::ApiError;
use crate::status::{StatusCache, StatusReport};

#[derive(Clone)]
struct ReceiverState {
    cache: Arc<StatusCache>,
    slot: Arc<ResultSlot>,
}

async fn webhook(
    State(state): State<ReceiverState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let report: StatusReport = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "invalid webhook payload");
        ApiError::BadRequest(format!("invalid webhook payload: {e}"))
    })?;

    let status = report.status;
    state.cache.set(status);
    tracing::info!(%status, "webhook received");

    if status.is_terminal() {
        let delivered = state.slot.publish(Detection {
            status,
            source: DetectionSource::Webhook,
        });
        if !delivered {
            tracing::debug!(%status, "no resolution waiting for webhook result");
        }
    }
    Ok(StatusCode::OK)
}

/// Router for the client-hosted `POST /webhook` endpoint.
pub fn webhook_router(cache: Arc<StatusCache>, slot: Arc<ResultSlot>) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .with_state(ReceiverState { cache, slot })
}

/// Push-side detection: a standing listener for server callbacks.
pub struct WebhookReceiver;

impl WebhookReceiver {
    /// Binds the listener, then serves on a background task for the rest of
    /// the process. The socket is accepting connections by the time this
    /// returns, so callers can register the callback immediately.
    pub async fn start(
        addr: impl ToSocketAddrs,
        cache: Arc<StatusCache>,
        slot: Arc<ResultSlot>,
    ) -> std::io::Result<ReceiverHandle> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let app = webhook_router(cache, slot).layer(TraceLayer::new_for_http());

        tracing::info!(addr = %local_addr, "webhook receiver listening");
        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                tracing::error!(error = %err, "webhook receiver stopped");
            }
        });

        Ok(ReceiverHandle { local_addr, task })
    }
}

/// A running receiver. The listener is already bound, so the callback URL
/// accepts connections as soon as this exists.
pub struct ReceiverHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ReceiverHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL the server should call back, using `host` as seen by the server.
    pub fn callback_url(&self, host: &str) -> String {
        format!("http://{host}:{}/webhook", self.local_addr.port())
    }

    /// False once the serve task has exited.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
