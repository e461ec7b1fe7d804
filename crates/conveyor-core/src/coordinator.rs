//! Execution coordinator: the single source of truth for execution state.
//!
//! Sits between the API facade and the worker pool. Owns submit, status
//! reads, cancellation, and the flow registry; all record mutations go
//! through the store's atomic transition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::domain::{
    ExecutionId, ExecutionRecord, ExecutionStatus, FailureInfo, FlowId, TaskEnvelope, Transition,
    WorkflowDefinition,
};
use crate::error::ConveyorError;
use crate::store::{ExecutionCounts, ExecutionStore};

pub struct Coordinator {
    store: Arc<dyn ExecutionStore>,
    broker: Arc<dyn Broker>,
    queue: String,

    /// Cancellation tokens for executions currently running in this
    /// process. Advisory: an execution running in another worker process
    /// sees the store's `cancel_requested` flag instead.
    cancellations: Mutex<HashMap<ExecutionId, CancellationToken>>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn ExecutionStore>, broker: Arc<dyn Broker>, queue: impl Into<String>) -> Self {
        Self {
            store,
            broker,
            queue: queue.into(),
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    // -- Flow registry ------------------------------------------------------

    pub async fn register_flow(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowDefinition, ConveyorError> {
        definition.validate()?;
        self.store.put_flow(&definition).await?;
        tracing::info!(flow_id = %definition.flow_id, version = %definition.version, "flow registered");
        Ok(definition)
    }

    pub async fn flow(&self, flow_id: &FlowId) -> Result<WorkflowDefinition, ConveyorError> {
        self.store.get_flow(flow_id).await
    }

    pub async fn list_flows(&self) -> Result<Vec<WorkflowDefinition>, ConveyorError> {
        self.store.list_flows().await
    }

    // -- Execution lifecycle ------------------------------------------------

    /// Create a PENDING record, hand the envelope to the broker, and
    /// return the execution id. Never waits for the execution itself.
    ///
    /// An unknown flow fails fast: nothing is recorded or enqueued. An
    /// enqueue failure leaves a FAILED record behind and surfaces the
    /// broker error to the caller, who may retry with backoff.
    pub async fn submit(
        &self,
        flow_id: FlowId,
        input: serde_json::Value,
    ) -> Result<ExecutionId, ConveyorError> {
        self.store.get_flow(&flow_id).await?;

        let execution_id = ExecutionId::generate();
        let record = ExecutionRecord::new(execution_id, flow_id.clone());
        self.store.insert(&record).await?;

        let envelope = TaskEnvelope::new(execution_id, flow_id.clone(), input);
        envelope.validate()?;

        match self.broker.enqueue(&self.queue, &envelope).await {
            Ok(()) => {
                self.store.apply(execution_id, Transition::Enqueued).await?;
                tracing::info!(%execution_id, flow_id = %flow_id, "execution submitted");
                Ok(execution_id)
            }
            Err(err) => {
                tracing::error!(%execution_id, flow_id = %flow_id, error = %err, "enqueue failed");
                self.store
                    .apply(
                        execution_id,
                        Transition::Failed {
                            failure: FailureInfo::enqueue(err.to_string()),
                        },
                    )
                    .await?;
                Err(ConveyorError::Enqueue(err.to_string()))
            }
        }
    }

    /// Consistent snapshot of one execution.
    pub async fn get_status(
        &self,
        execution_id: ExecutionId,
    ) -> Result<ExecutionRecord, ConveyorError> {
        self.store.get(execution_id).await
    }

    /// Worker-side entry point for record transitions.
    pub async fn apply_transition(
        &self,
        execution_id: ExecutionId,
        transition: Transition,
    ) -> Result<ExecutionRecord, ConveyorError> {
        self.store.apply(execution_id, transition).await
    }

    /// Best-effort cancellation.
    ///
    /// PENDING/QUEUED records go straight to CANCELLED; a worker that
    /// later dequeues the stale envelope skips it. RUNNING records only
    /// get the advisory flag (and the local token, when the execution
    /// runs in this process). Terminal records are left alone.
    pub async fn cancel(&self, execution_id: ExecutionId) -> Result<ExecutionRecord, ConveyorError> {
        let record = self.store.get(execution_id).await?;
        match record.status {
            ExecutionStatus::Pending | ExecutionStatus::Queued => {
                match self.store.apply(execution_id, Transition::Cancelled).await {
                    Ok(record) => {
                        tracing::info!(%execution_id, "execution cancelled");
                        Ok(record)
                    }
                    // Lost the race against a claiming worker; downgrade
                    // to the advisory path.
                    Err(ConveyorError::InvalidTransition { .. }) => {
                        self.request_running_cancel(execution_id).await
                    }
                    Err(err) => Err(err),
                }
            }
            ExecutionStatus::Running => self.request_running_cancel(execution_id).await,
            _ => Ok(record),
        }
    }

    async fn request_running_cancel(
        &self,
        execution_id: ExecutionId,
    ) -> Result<ExecutionRecord, ConveyorError> {
        let record = self.store.request_cancel(execution_id).await?;
        if let Some(token) = self
            .cancellations
            .lock()
            .expect("cancellation registry poisoned")
            .get(&execution_id)
        {
            token.cancel();
        }
        tracing::info!(%execution_id, "cancellation requested for running execution");
        Ok(record)
    }

    pub async fn stats(&self) -> Result<ExecutionCounts, ConveyorError> {
        self.store.counts().await
    }

    // -- In-process cancellation tokens ------------------------------------

    /// Called by an executor when it claims an execution. The returned
    /// token trips if a cancel request arrives while the logic runs here.
    pub fn register_cancellation(&self, execution_id: ExecutionId) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancellations
            .lock()
            .expect("cancellation registry poisoned")
            .insert(execution_id, token.clone());
        token
    }

    /// Called by an executor once the execution leaves its hands.
    pub fn clear_cancellation(&self, execution_id: ExecutionId) {
        self.cancellations
            .lock()
            .expect("cancellation registry poisoned")
            .remove(&execution_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{InMemoryBroker, RetryPolicy};
    use crate::store::InMemoryStore;
    use std::time::Duration;

    fn coordinator() -> (Arc<Coordinator>, Arc<InMemoryBroker>) {
        let store = Arc::new(InMemoryStore::new());
        let broker = Arc::new(InMemoryBroker::new(RetryPolicy::new(
            Duration::from_millis(10),
            2.0,
        )));
        let coordinator = Arc::new(Coordinator::new(store, broker.clone(), "work"));
        (coordinator, broker)
    }

    async fn with_flow(coordinator: &Coordinator, flow_id: &str) {
        coordinator
            .register_flow(WorkflowDefinition::new(
                FlowId::new(flow_id),
                "1",
                serde_json::json!([]),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn submit_returns_immediately_with_a_queued_record() {
        let (coordinator, _broker) = coordinator();
        with_flow(&coordinator, "f1").await;

        let id = coordinator
            .submit(FlowId::new("f1"), serde_json::json!({"x": 1}))
            .await
            .unwrap();

        // Fresh submissions are never terminal.
        let record = coordinator.get_status(id).await.unwrap();
        assert!(matches!(
            record.status,
            ExecutionStatus::Pending | ExecutionStatus::Queued
        ));
        assert_eq!(record.attempt_count, 0);
        assert!(record.result.is_none());
    }

    #[tokio::test]
    async fn submit_unknown_flow_fails_fast_and_enqueues_nothing() {
        let (coordinator, broker) = coordinator();

        let err = coordinator
            .submit(FlowId::new("ghost"), serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ConveyorError::UnknownFlow(_)));

        let delivery = broker
            .dequeue("work", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(delivery.is_none());
    }

    #[tokio::test]
    async fn enqueue_failure_leaves_a_failed_record() {
        let (coordinator, broker) = coordinator();
        with_flow(&coordinator, "f1").await;
        broker.close();

        let err = coordinator
            .submit(FlowId::new("f1"), serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ConveyorError::Enqueue(_)));

        // The failure is visible to pollers as a FAILED record.
        let counts = coordinator.stats().await.unwrap();
        assert_eq!(counts.failed, 1);
    }

    #[tokio::test]
    async fn cancel_queued_goes_terminal() {
        let (coordinator, _broker) = coordinator();
        with_flow(&coordinator, "f1").await;

        let id = coordinator
            .submit(FlowId::new("f1"), serde_json::Value::Null)
            .await
            .unwrap();
        let record = coordinator.cancel(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_running_is_advisory() {
        let (coordinator, _broker) = coordinator();
        with_flow(&coordinator, "f1").await;

        let id = coordinator
            .submit(FlowId::new("f1"), serde_json::Value::Null)
            .await
            .unwrap();
        coordinator
            .apply_transition(id, Transition::Started { redelivered: false })
            .await
            .unwrap();

        let token = coordinator.register_cancellation(id);
        assert!(!token.is_cancelled());

        let record = coordinator.cancel(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Running);
        assert!(record.cancel_requested);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_terminal_is_a_no_op() {
        let (coordinator, _broker) = coordinator();
        with_flow(&coordinator, "f1").await;

        let id = coordinator
            .submit(FlowId::new("f1"), serde_json::Value::Null)
            .await
            .unwrap();
        coordinator
            .apply_transition(id, Transition::Started { redelivered: false })
            .await
            .unwrap();
        coordinator
            .apply_transition(
                id,
                Transition::Succeeded {
                    result: serde_json::Value::Null,
                },
            )
            .await
            .unwrap();

        let record = coordinator.cancel(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn get_status_unknown_execution() {
        let (coordinator, _broker) = coordinator();
        let err = coordinator
            .get_status(ExecutionId::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, ConveyorError::UnknownExecution(_)));
    }

    #[tokio::test]
    async fn duplicate_flow_registration_rejected() {
        let (coordinator, _broker) = coordinator();
        with_flow(&coordinator, "f1").await;

        let err = coordinator
            .register_flow(WorkflowDefinition::new(
                FlowId::new("f1"),
                "2",
                serde_json::json!([]),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ConveyorError::FlowAlreadyRegistered(_)));
    }

}
