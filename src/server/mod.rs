//! HTTP service: binds a listener and serves [`router::router`].
//!
//! Pattern: bind → spawn the axum server in a background task → return a
//! handle carrying the bound address and a shutdown channel.

pub mod error;
pub mod router;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::PipelineError;
use crate::run::Pipeline;

pub use router::router;

/// Handle to a running server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Ask the server to stop accepting connections and wait for in-flight
    /// requests to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("Server shutdown signal sent");
        }
        if let Err(e) = self.task.await {
            tracing::error!("Server task ended abnormally: {e}");
        }
    }

    /// Wait until the server stops on its own.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!("Server task ended abnormally: {e}");
        }
    }
}

/// Bind `addr` and start serving `pipeline` in a background task.
///
/// Pass port 0 to bind an ephemeral port; [`ServerHandle::addr`] reports the
/// one actually bound.
pub async fn start(addr: SocketAddr, pipeline: Pipeline) -> Result<ServerHandle, PipelineError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| PipelineError::io(format!("Failed to bind {addr}"), e))?;
    let addr = listener
        .local_addr()
        .map_err(|e| PipelineError::io("Failed to get server address", e))?;

    let app = router(Arc::new(pipeline));
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("Server received shutdown signal");
        };

        tracing::info!(%addr, "Server started");

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            tracing::error!("Server error: {e}");
        }

        tracing::info!("Server stopped");
    });

    Ok(ServerHandle {
        addr,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}
