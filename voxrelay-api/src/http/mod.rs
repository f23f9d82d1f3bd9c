// Module: http
// Health, stats and the voice gateway websocket

pub mod health;
pub mod websocket;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use voxrelay_core::config::ServerConfig;

use crate::voice::GatewayContext;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub gateway: GatewayContext,
    pub server: Arc<ServerConfig>,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let ws_path = state.server.ws_path.clone();

    Router::new()
        .route(&ws_path, get(websocket::websocket_handler))
        .merge(health::create_health_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
