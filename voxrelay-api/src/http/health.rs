//! Health check and statistics endpoints

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};

use crate::http::AppState;

pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
}

/// Basic health check (always returns OK if server is running)
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

/// Channel, peer, producer and consumer counts across the registry
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.gateway.registry.stats().await)
}
