//! Liveness endpoint, mounted at the root (not under /api/v1).

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::error::AppResult;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

/// GET /health
///
/// Reads the execution counts so a green response also proves the store
/// is reachable.
async fn health(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let counts = state.coordinator.stats().await?;
    Ok(Json(json!({
        "status": "ok",
        "executions": counts,
    })))
}
