//! Route modules for the material page server

pub mod health;
pub mod materials;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .route("/api/v1/cache/stats", get(health::cache_stats))
        .nest("/material", materials::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
