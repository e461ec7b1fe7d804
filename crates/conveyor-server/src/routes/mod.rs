//! Route table for the API facade.

pub mod executions;
pub mod health;
pub mod workflows;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// All `/api/v1` routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/workflows", post(workflows::register).get(workflows::list))
        .route("/workflows/{flow_id}", get(workflows::fetch))
        .route("/workflows/{flow_id}/execute", post(workflows::execute))
        .route("/executions/stats", get(executions::stats))
        .route("/executions/{execution_id}/status", get(executions::status))
        .route("/executions/{execution_id}/cancel", post(executions::cancel))
}
