//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;

use super::AppState;
use crate::types::HealthResponse;

/// Create health check router
pub fn health_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
}

/// GET /health
///
/// Liveness plus the keeper's view of the engine: the batch accepting flows and how many
/// proposals are waiting for the next tick.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let now = state.engine.now();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().timestamp(),
        current_batch: state.engine.current_batch(),
        matured_proposals: state.engine.matured_proposals(now).len(),
    })
}
