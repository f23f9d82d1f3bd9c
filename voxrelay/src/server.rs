//! Server lifecycle management
//!
//! Serves the HTTP/websocket router until SIGINT or SIGTERM, then stops
//! accepting connections and tears down every channel.

use std::sync::Arc;
use tracing::{error, info};

use voxrelay_api::{create_router, voice::GatewayContext, AppState};
use voxrelay_core::{repository::VoiceSessionStore, Config};
use voxrelay_sfu::ChannelRegistry;

pub struct VoxRelayServer {
    config: Config,
    registry: Arc<ChannelRegistry>,
    sessions: Arc<dyn VoiceSessionStore>,
}

impl VoxRelayServer {
    pub fn new(
        config: Config,
        registry: Arc<ChannelRegistry>,
        sessions: Arc<dyn VoiceSessionStore>,
    ) -> Self {
        Self {
            config,
            registry,
            sessions,
        }
    }

    /// Serve until a shutdown signal arrives
    pub async fn start(self) -> anyhow::Result<()> {
        let http_address = self.config.http_address();
        let http_addr: std::net::SocketAddr = http_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{http_address}': {e}"))?;

        let state = AppState {
            gateway: GatewayContext {
                registry: Arc::clone(&self.registry),
                sessions: Arc::clone(&self.sessions),
                voice: Arc::new(self.config.voice.clone()),
            },
            server: Arc::new(self.config.server.clone()),
        };
        let router = create_router(state);

        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;
        info!(
            address = %http_addr,
            ws_path = %self.config.server.ws_path,
            "Voice gateway listening"
        );

        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            error!(error = %e, "HTTP server error");
        }
        info!("HTTP server shut down gracefully");

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&self) {
        info!("Shutting down VoxRelay server...");
        let stats = self.registry.stats().await;
        if stats.peers > 0 {
            info!(
                channels = stats.channels,
                peers = stats.peers,
                "Tearing down active channels"
            );
        }
        self.registry.shutdown().await;
        info!("VoxRelay server shutdown complete");
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
