//! HTTP API layer.
//!
//! Thin handlers for the notification ingress and a ping route. Camera
//! state lives in the host; the router only needs the device registry and
//! the readings channel.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::host::{DeviceRegistry, ReadingsSender};

pub mod http;

pub use http::create_router;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind or serve on a TCP port.
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Shared state of the API layer.
#[derive(Clone)]
pub struct AppState {
    /// Host device registry, used to validate ingress targets.
    pub devices: Arc<dyn DeviceRegistry>,
    /// Readings channel notifications are published on.
    pub readings: ReadingsSender,
    /// Path prefix of every route, without surrounding slashes.
    pub api_route: String,
}

impl AppState {
    pub fn new(
        devices: Arc<dyn DeviceRegistry>,
        readings: ReadingsSender,
        api_route: impl Into<String>,
    ) -> Self {
        Self {
            devices,
            readings,
            api_route: api_route.into().trim_matches('/').to_string(),
        }
    }
}

/// Serves the API on `addr` until `shutdown` is cancelled.
pub async fn start_server(
    addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let local = listener.local_addr()?;
    log::info!("[Server] Listening on http://{}", local);

    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    log::info!("[Server] Stopped");
    Ok(())
}
