//! Health check endpoint for monitoring probes.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use crate::http::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    active_connections: usize,
}

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Liveness probe; reports the current registry cardinality as a bonus
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        active_connections: state.registry.len(),
    })
}
