//! Workflow runtime: the pluggable execution seam.
//!
//! The worker pool only knows [`WorkflowRunner`]: hand it a definition and
//! a payload, get a result or an error back. [`FlowRunner`] is the default
//! implementation, interpreting a definition's `steps` document and
//! dispatching each step to a registered [`StepHandler`] by kind.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::domain::{ExecutionId, WorkflowDefinition};
use crate::error::ConveyorError;

/// Context handed to the running workflow logic.
///
/// Cancellation is cooperative: the logic checks the token at its own
/// pace; nothing preempts it.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: ExecutionId,

    /// 1-indexed attempt number for this run.
    pub attempt: u32,

    token: CancellationToken,
}

impl ExecutionContext {
    pub fn new(execution_id: ExecutionId, attempt: u32, token: CancellationToken) -> Self {
        Self {
            execution_id,
            attempt,
            token,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// For logic that wants to `select!` against cancellation.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }
}

/// The pluggable workflow logic. The runtime invokes it, captures the
/// result or error, and translates that into a record transition; what
/// happens inside is none of the runtime's business.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    async fn run(
        &self,
        definition: &WorkflowDefinition,
        input: &serde_json::Value,
        ctx: &ExecutionContext,
    ) -> Result<serde_json::Value, ConveyorError>;
}

/// One step kind (e.g. "http", "log").
#[async_trait]
pub trait StepHandler: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn run(
        &self,
        config: &serde_json::Value,
        input: &serde_json::Value,
        ctx: &ExecutionContext,
    ) -> Result<serde_json::Value, ConveyorError>;
}

/// Registry of step handlers (kind -> handler).
///
/// Built during initialization, immutable during runtime; no locks needed.
#[derive(Default)]
pub struct StepRegistry {
    handlers: HashMap<&'static str, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn StepHandler>) -> Result<(), ConveyorError> {
        let kind = handler.kind();
        if self.handlers.contains_key(kind) {
            return Err(ConveyorError::DuplicateStepHandler(kind.to_string()));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn StepHandler>> {
        self.handlers.get(kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Shape of one entry in a definition's `steps` array.
#[derive(Debug, Deserialize)]
struct StepSpec {
    id: String,
    kind: String,
    #[serde(default)]
    config: serde_json::Value,
}

/// Default runner: executes the definition's steps in order and collects
/// each step's output under its id.
pub struct FlowRunner {
    registry: Arc<StepRegistry>,
}

impl FlowRunner {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl WorkflowRunner for FlowRunner {
    async fn run(
        &self,
        definition: &WorkflowDefinition,
        input: &serde_json::Value,
        ctx: &ExecutionContext,
    ) -> Result<serde_json::Value, ConveyorError> {
        let steps: Vec<StepSpec> = serde_json::from_value(definition.steps.clone())
            .map_err(|e| ConveyorError::WorkflowExecution(format!("malformed steps document: {e}")))?;

        let mut outputs = serde_json::Map::new();
        for step in &steps {
            if ctx.is_cancelled() {
                return Err(ConveyorError::WorkflowExecution(format!(
                    "cancelled before step \"{}\"",
                    step.id
                )));
            }

            let handler = self.registry.get(&step.kind).ok_or_else(|| {
                ConveyorError::WorkflowExecution(format!(
                    "no step handler registered for kind \"{}\"",
                    step.kind
                ))
            })?;

            tracing::debug!(
                execution_id = %ctx.execution_id,
                step_id = %step.id,
                kind = %step.kind,
                "running step"
            );

            let output = handler.run(&step.config, input, ctx).await.map_err(|e| {
                ConveyorError::WorkflowExecution(format!("step \"{}\" failed: {e}", step.id))
            })?;
            outputs.insert(step.id.clone(), output);
        }

        Ok(serde_json::json!({ "steps": outputs }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FlowId;

    struct EchoStep;

    #[async_trait]
    impl StepHandler for EchoStep {
        fn kind(&self) -> &'static str {
            "echo"
        }

        async fn run(
            &self,
            config: &serde_json::Value,
            input: &serde_json::Value,
            _ctx: &ExecutionContext,
        ) -> Result<serde_json::Value, ConveyorError> {
            Ok(serde_json::json!({ "config": config, "input": input }))
        }
    }

    struct FailingStep;

    #[async_trait]
    impl StepHandler for FailingStep {
        fn kind(&self) -> &'static str {
            "broken"
        }

        async fn run(
            &self,
            _config: &serde_json::Value,
            _input: &serde_json::Value,
            _ctx: &ExecutionContext,
        ) -> Result<serde_json::Value, ConveyorError> {
            Err(ConveyorError::WorkflowExecution("boom".to_string()))
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(ExecutionId::generate(), 1, CancellationToken::new())
    }

    fn definition(steps: serde_json::Value) -> WorkflowDefinition {
        WorkflowDefinition::new(FlowId::new("f1"), "1", steps)
    }

    fn runner_with(handler: Arc<dyn StepHandler>) -> FlowRunner {
        let mut registry = StepRegistry::new();
        registry.register(handler).unwrap();
        FlowRunner::new(Arc::new(registry))
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = StepRegistry::new();
        registry.register(Arc::new(EchoStep)).unwrap();
        let err = registry.register(Arc::new(EchoStep)).unwrap_err();
        assert!(matches!(err, ConveyorError::DuplicateStepHandler(_)));
    }

    #[tokio::test]
    async fn runs_steps_in_order_and_collects_outputs() {
        let runner = runner_with(Arc::new(EchoStep));
        let def = definition(serde_json::json!([
            {"id": "first", "kind": "echo", "config": {"x": 1}},
            {"id": "second", "kind": "echo"},
        ]));

        let result = runner
            .run(&def, &serde_json::json!({"in": true}), &ctx())
            .await
            .unwrap();

        let steps = result.get("steps").unwrap();
        assert_eq!(steps["first"]["config"], serde_json::json!({"x": 1}));
        assert_eq!(steps["second"]["input"], serde_json::json!({"in": true}));
    }

    #[tokio::test]
    async fn unknown_step_kind_fails_the_run() {
        let runner = runner_with(Arc::new(EchoStep));
        let def = definition(serde_json::json!([{"id": "s", "kind": "missing"}]));

        let err = runner
            .run(&def, &serde_json::Value::Null, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ConveyorError::WorkflowExecution(_)));
    }

    #[tokio::test]
    async fn failing_step_names_itself_in_the_error() {
        let runner = runner_with(Arc::new(FailingStep));
        let def = definition(serde_json::json!([{"id": "s1", "kind": "broken"}]));

        let err = runner
            .run(&def, &serde_json::Value::Null, &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("s1"));
    }

    #[tokio::test]
    async fn malformed_steps_document_fails() {
        let runner = runner_with(Arc::new(EchoStep));
        let def = definition(serde_json::json!({"not": "an array"}));

        let err = runner
            .run(&def, &serde_json::Value::Null, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ConveyorError::WorkflowExecution(_)));
    }

    #[tokio::test]
    async fn cancelled_context_stops_before_the_next_step() {
        let runner = runner_with(Arc::new(EchoStep));
        let def = definition(serde_json::json!([{"id": "s1", "kind": "echo"}]));

        let token = CancellationToken::new();
        token.cancel();
        let ctx = ExecutionContext::new(ExecutionId::generate(), 1, token);

        let err = runner.run(&def, &serde_json::Value::Null, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
