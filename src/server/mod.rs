//! Job simulator server: `GET /status` and `POST /register-webhook`.

mod job;
mod registry;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::JobwatchConfig;

pub use job::{DelayRange, JobSession};
pub use registry::{NotifyOutcome, RegistrationError, WebhookRegistry};
pub use routes::{router, AppState};

/// A bound simulator server that has not started serving yet.
pub struct SimulatorServer {
    listener: TcpListener,
    state: AppState,
}

impl SimulatorServer {
    pub async fn bind(addr: impl ToSocketAddrs, state: AppState) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> std::io::Result<()> {
        let app = router(self.state).layer(TraceLayer::new_for_http());
        axum::serve(self.listener, app).await
    }

    /// Serves on a background task.
    pub fn spawn(self) -> JoinHandle<std::io::Result<()>> {
        tokio::spawn(self.run())
    }
}

pub fn state_from_config(config: &JobwatchConfig) -> Result<AppState> {
    let registry = Arc::new(WebhookRegistry::new(config.notify_timeout())?);
    Ok(AppState::new(registry, config.delay_range()?))
}

/// Runs the simulator until the process exits.
pub async fn serve(config: &JobwatchConfig) -> Result<()> {
    let state = state_from_config(config)?;
    let server =
        SimulatorServer::bind((config.server_host.as_str(), config.server_port), state).await?;
    tracing::info!(addr = %server.local_addr()?, "simulator server is starting");
    server.run().await?;
    Ok(())
}
