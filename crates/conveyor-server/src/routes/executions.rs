//! Handlers for the `/executions` resource.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;

use conveyor_core::domain::ExecutionId;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

fn parse_execution_id(raw: &str) -> Result<ExecutionId, AppError> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("\"{raw}\" is not a valid execution id")))
}

/// GET /api/v1/executions/{execution_id}/status
///
/// Snapshot of one execution: status, timestamps, and result or error
/// once terminal.
pub async fn status(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let execution_id = parse_execution_id(&execution_id)?;
    let record = state.coordinator.get_status(execution_id).await?;
    Ok(Json(DataResponse { data: record }))
}

/// POST /api/v1/executions/{execution_id}/cancel
///
/// Best-effort cancellation; returns the record after the attempt. A
/// running execution only gets the advisory flag.
pub async fn cancel(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let execution_id = parse_execution_id(&execution_id)?;
    let record = state.coordinator.cancel(execution_id).await?;
    Ok(Json(DataResponse { data: record }))
}

/// GET /api/v1/executions/stats
pub async fn stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let counts = state.coordinator.stats().await?;
    Ok(Json(DataResponse { data: counts }))
}
