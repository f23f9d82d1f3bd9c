mod server;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use voxrelay_core::{
    bootstrap::{build_session_store, load_config},
    logging,
};
use voxrelay_sfu::{BookkeepingEngine, ChannelRegistry};

use server::VoxRelayServer;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load and validate configuration
    let config = load_config()?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("VoxRelay server starting...");
    info!(address = %config.http_address(), "HTTP address configured");

    // 3. Voice session store (Postgres or static)
    let sessions = build_session_store(&config).await?;

    // 4. Media engine and channel registry
    let engine = Arc::new(BookkeepingEngine::new(config.engine.clone()));
    let registry = ChannelRegistry::new(config.sfu.clone(), engine);

    // 5. Serve until shutdown
    VoxRelayServer::new(config, registry, sessions).start().await
}
