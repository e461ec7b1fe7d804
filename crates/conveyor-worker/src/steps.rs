//! Built-in step handlers for the default runner.
//!
//! - `http`: one HTTP request per step, config-driven.
//! - `log`: emit a message through the process log.
//!
//! Anything beyond these is registered by whoever embeds the pool.

use async_trait::async_trait;
use serde_json::{json, Value};

use conveyor_core::error::ConveyorError;
use conveyor_core::runtime::{ExecutionContext, StepHandler};

/// `http` step: performs one request.
///
/// Config:
/// ```json
/// { "method": "POST", "url": "https://...", "headers": {"x-a": "b"}, "json": {...} }
/// ```
/// `method` defaults to GET. The step fails when the response status is
/// 400 or above.
pub struct HttpStep {
    client: reqwest::Client,
}

impl HttpStep {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepHandler for HttpStep {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn run(
        &self,
        config: &Value,
        _input: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, ConveyorError> {
        let url = config
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ConveyorError::WorkflowExecution("http step requires a url".into()))?;

        let method = config
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET");
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| ConveyorError::WorkflowExecution(format!("invalid method \"{method}\"")))?;

        let mut request = self.client.request(method, url);

        if let Some(headers) = config.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }
        if let Some(body) = config.get("json") {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ConveyorError::WorkflowExecution(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_client_error() || status.is_server_error() {
            return Err(ConveyorError::WorkflowExecution(format!(
                "{url} answered {status}"
            )));
        }

        // Hand structured output downstream when the body parses as JSON.
        let body = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));
        Ok(json!({ "status": status.as_u16(), "body": body }))
    }
}

/// `log` step: writes its message (and the execution input) to the log.
pub struct LogStep;

#[async_trait]
impl StepHandler for LogStep {
    fn kind(&self) -> &'static str {
        "log"
    }

    async fn run(
        &self,
        config: &Value,
        input: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, ConveyorError> {
        let message = config
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("(no message)");
        tracing::info!(execution_id = %ctx.execution_id, %message, %input, "log step");
        Ok(json!({ "message": message }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::domain::ExecutionId;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(ExecutionId::generate(), 1, CancellationToken::new())
    }

    #[tokio::test]
    async fn log_step_echoes_its_message() {
        let out = LogStep
            .run(&json!({"message": "hello"}), &Value::Null, &ctx())
            .await
            .unwrap();
        assert_eq!(out, json!({"message": "hello"}));
    }

    #[tokio::test]
    async fn http_step_requires_a_url() {
        let err = HttpStep::new()
            .run(&json!({}), &Value::Null, &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("url"));
    }

    #[tokio::test]
    async fn http_step_rejects_garbage_methods() {
        let err = HttpStep::new()
            .run(
                &json!({"url": "http://localhost:1", "method": "not a method"}),
                &Value::Null,
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("method"));
    }
}
