use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use conveyor_core::ConveyorError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`ConveyorError`] for domain errors and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON error
/// responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `conveyor-core`.
    #[error(transparent)]
    Core(#[from] ConveyorError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    fn classify(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Core(core) => match core {
                ConveyorError::UnknownExecution(_) | ConveyorError::UnknownFlow(_) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", core.to_string())
                }
                ConveyorError::InvalidEnvelope(_) => (
                    StatusCode::BAD_REQUEST,
                    "VALIDATION_ERROR",
                    core.to_string(),
                ),
                ConveyorError::FlowAlreadyRegistered(_)
                | ConveyorError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "CONFLICT", core.to_string())
                }
                ConveyorError::BrokerUnavailable(_) | ConveyorError::Enqueue(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "BROKER_UNAVAILABLE",
                    core.to_string(),
                ),
                other => {
                    tracing::error!(error = %other, "internal error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.classify();
        let body = json!({
            "error": message,
            "code": code,
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::domain::{ExecutionId, FlowId};

    #[test]
    fn unknown_resources_map_to_404() {
        let err = AppError::Core(ConveyorError::UnknownExecution(ExecutionId::generate()));
        assert_eq!(err.classify().0, StatusCode::NOT_FOUND);

        let err = AppError::Core(ConveyorError::UnknownFlow(FlowId::new("ghost")));
        assert_eq!(err.classify().0, StatusCode::NOT_FOUND);
    }

    #[test]
    fn conflicts_map_to_409() {
        let err = AppError::Core(ConveyorError::FlowAlreadyRegistered(FlowId::new("f")));
        assert_eq!(err.classify().0, StatusCode::CONFLICT);
    }

    #[test]
    fn broker_failures_map_to_503() {
        let err = AppError::Core(ConveyorError::BrokerUnavailable("down".to_string()));
        assert_eq!(err.classify().0, StatusCode::SERVICE_UNAVAILABLE);

        let err = AppError::Core(ConveyorError::Enqueue("down".to_string()));
        assert_eq!(err.classify().0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn validation_maps_to_400() {
        let err = AppError::Core(ConveyorError::InvalidEnvelope("empty".to_string()));
        assert_eq!(err.classify().0, StatusCode::BAD_REQUEST);

        let err = AppError::BadRequest("not a ulid".to_string());
        assert_eq!(err.classify().0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn everything_else_is_a_sanitized_500() {
        let err = AppError::Core(ConveyorError::Store("disk on fire".to_string()));
        let (status, _, message) = err.classify();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!message.contains("disk"));
    }
}
