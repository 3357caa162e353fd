//! HTTP server startup and graceful shutdown.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use relaycast_core::{BroadcastRelay, Config, ConnectionRegistry};

use crate::http::{self, AppState};

/// Owns the configured components and runs the HTTP server until a
/// shutdown signal arrives.
pub struct RelayServer {
    config: Config,
    registry: ConnectionRegistry,
    relay: BroadcastRelay,
}

impl RelayServer {
    #[must_use]
    pub fn new(config: Config, registry: ConnectionRegistry, relay: BroadcastRelay) -> Self {
        Self {
            config,
            registry,
            relay,
        }
    }

    /// Bind the listener and serve until a shutdown signal arrives
    pub async fn start(self) -> Result<()> {
        let addr: std::net::SocketAddr = self.config.listen_address().parse()?;

        let state = AppState {
            config: Arc::new(self.config),
            registry: self.registry,
            relay: self.relay,
        };
        let router = http::create_router(state);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("HTTP server listening on {}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
