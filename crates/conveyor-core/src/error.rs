use std::time::Duration;

use thiserror::Error;

use crate::domain::{ExecutionId, ExecutionStatus, FlowId};

#[derive(Debug, Error)]
pub enum ConveyorError {
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("enqueue failed: {0}")]
    Enqueue(String),

    #[error("unknown execution {0}")]
    UnknownExecution(ExecutionId),

    #[error("unknown flow \"{0}\"")]
    UnknownFlow(FlowId),

    #[error("flow \"{0}\" is already registered")]
    FlowAlreadyRegistered(FlowId),

    #[error("invalid transition for {execution_id}: {attempted} is not allowed from {from}")]
    InvalidTransition {
        execution_id: ExecutionId,
        from: ExecutionStatus,
        attempted: &'static str,
    },

    #[error("execution exceeded deadline of {0:?}")]
    ExecutionTimeout(Duration),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("workflow execution failed: {0}")]
    WorkflowExecution(String),

    #[error("duplicate step handler for kind \"{0}\"")]
    DuplicateStepHandler(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for ConveyorError {
    fn from(err: sqlx::Error) -> Self {
        ConveyorError::Store(err.to_string())
    }
}
