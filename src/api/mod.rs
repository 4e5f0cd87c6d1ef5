//! HTTP surface: health and readiness probes

pub mod health;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let api_v1 = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
}
