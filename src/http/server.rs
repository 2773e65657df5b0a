//! TCP server for the relay with graceful shutdown.

use crate::defaults;
use crate::error::{RelayError, Result};
use crate::http::{AppState, router};
use log::{info, warn};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Relay server bound to a local address.
pub struct RelayServer {
    listener: TcpListener,
    state: AppState,
}

impl RelayServer {
    /// Bind to `addr`. Port 0 picks a free port; see [`RelayServer::local_addr`].
    pub async fn bind(addr: &str, state: AppState) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::Server {
                message: format!("Failed to bind to {addr}: {e}"),
            })?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` resolves, then give in-flight sessions a short
    /// grace period to finish.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        info!("Starting server on {addr}");

        let (started_tx, started_rx) = oneshot::channel::<()>();
        let serve = axum::serve(self.listener, router(self.state)).with_graceful_shutdown(
            async move {
                shutdown.await;
                info!("Shutting down server gracefully...");
                started_tx.send(()).ok();
            },
        );

        let grace = async {
            match started_rx.await {
                Ok(()) => tokio::time::sleep(defaults::SHUTDOWN_GRACE).await,
                Err(_) => std::future::pending().await,
            }
        };

        tokio::select! {
            res = serve.into_future() => res.map_err(|e| RelayError::Server {
                message: e.to_string(),
            })?,
            _ = grace => warn!("Shutdown grace period elapsed, dropping open sessions"),
        }
        info!("Server stopped");
        Ok(())
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("Error listening for SIGINT: {e}");
                std::future::pending::<()>().await;
            }
            info!("Received SIGINT");
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                warn!("Error setting up signal handler: {e}");
                std::future::pending::<()>().await;
            }
            info!("Received SIGTERM");
        }
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| RelayError::Other(format!("Failed to register SIGTERM handler: {e}")))?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    // Ctrl+C still works
    std::future::pending::<()>().await
}
