//! Health and cache statistics routes

use axum::{extract::State, Json};
use serde::Serialize;

use crate::render::ServiceStats;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Render and source cache counters
pub async fn cache_stats(State(state): State<AppState>) -> Json<ServiceStats> {
    Json(state.pages().stats())
}
