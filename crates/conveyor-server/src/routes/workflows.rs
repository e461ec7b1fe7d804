//! Handlers for the `/workflows` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use conveyor_core::domain::{ExecutionId, FlowId, WorkflowDefinition};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterFlowRequest {
    pub flow_id: String,
    pub version: String,
    pub steps: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct SubmittedExecution {
    pub execution_id: ExecutionId,
}

/// POST /api/v1/workflows
///
/// Register a new workflow definition. Definitions are immutable: a
/// duplicate flow_id is a 409, not an update.
pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<RegisterFlowRequest>,
) -> AppResult<impl IntoResponse> {
    let definition = WorkflowDefinition::new(FlowId::new(input.flow_id), input.version, input.steps);
    let definition = state.coordinator.register_flow(definition).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: definition })))
}

/// GET /api/v1/workflows
pub async fn list(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let flows = state.coordinator.list_flows().await?;
    Ok(Json(DataResponse { data: flows }))
}

/// GET /api/v1/workflows/{flow_id}
pub async fn fetch(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let flow = state.coordinator.flow(&FlowId::new(flow_id)).await?;
    Ok(Json(DataResponse { data: flow }))
}

/// POST /api/v1/workflows/{flow_id}/execute
///
/// Submit an execution of a registered flow. Returns 202 with the
/// execution id immediately; the result arrives via status polling. The
/// optional JSON body becomes the opaque input payload.
pub async fn execute(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    input: Option<Json<serde_json::Value>>,
) -> AppResult<impl IntoResponse> {
    let payload = input.map(|Json(v)| v).unwrap_or(serde_json::json!({}));
    let execution_id = state
        .coordinator
        .submit(FlowId::new(flow_id), payload)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SubmittedExecution { execution_id },
        }),
    ))
}
