//! API routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, AppState};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))
        .route("/ping", get(handlers::ping))

        // Observer control
        .route("/api/v1/observer/status", get(handlers::observer_status))
        .route("/api/v1/observer/start", post(handlers::start_observer))
        .route("/api/v1/observer/stop", post(handlers::stop_observer))

        // Host snapshot
        .route("/api/v1/system", get(handlers::system_info))

        // Self metrics
        .route("/metrics", get(handlers::prometheus_metrics))

        .with_state(state)
}
