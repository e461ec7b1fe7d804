//! In-memory store implementation, for tests and embedded runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ExecutionCounts, ExecutionStore};
use crate::domain::{
    ExecutionId, ExecutionRecord, ExecutionStatus, FlowId, Transition, WorkflowDefinition,
};
use crate::error::ConveyorError;

#[derive(Default)]
struct StoreState {
    records: HashMap<ExecutionId, ExecutionRecord>,
    flows: HashMap<FlowId, WorkflowDefinition>,
}

/// Mutex-guarded maps. The lock gives `apply` the same serialization the
/// sqlite store gets from its conditional UPDATE.
#[derive(Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn insert(&self, record: &ExecutionRecord) -> Result<(), ConveyorError> {
        let mut state = self.state.lock().await;
        if state.records.contains_key(&record.execution_id) {
            return Err(ConveyorError::Store(format!(
                "duplicate execution_id {}",
                record.execution_id
            )));
        }
        state.records.insert(record.execution_id, record.clone());
        Ok(())
    }

    async fn apply(
        &self,
        execution_id: ExecutionId,
        transition: Transition,
    ) -> Result<ExecutionRecord, ConveyorError> {
        let mut state = self.state.lock().await;
        let record = state
            .records
            .get_mut(&execution_id)
            .ok_or(ConveyorError::UnknownExecution(execution_id))?;
        record.apply(&transition)?;
        Ok(record.clone())
    }

    async fn get(&self, execution_id: ExecutionId) -> Result<ExecutionRecord, ConveyorError> {
        let state = self.state.lock().await;
        state
            .records
            .get(&execution_id)
            .cloned()
            .ok_or(ConveyorError::UnknownExecution(execution_id))
    }

    async fn request_cancel(
        &self,
        execution_id: ExecutionId,
    ) -> Result<ExecutionRecord, ConveyorError> {
        let mut state = self.state.lock().await;
        let record = state
            .records
            .get_mut(&execution_id)
            .ok_or(ConveyorError::UnknownExecution(execution_id))?;
        if record.status == ExecutionStatus::Running {
            record.cancel_requested = true;
        }
        Ok(record.clone())
    }

    async fn counts(&self) -> Result<ExecutionCounts, ConveyorError> {
        let state = self.state.lock().await;
        let mut counts = ExecutionCounts::default();
        for record in state.records.values() {
            match record.status {
                ExecutionStatus::Pending => counts.pending += 1,
                ExecutionStatus::Queued => counts.queued += 1,
                ExecutionStatus::Running => counts.running += 1,
                ExecutionStatus::Succeeded => counts.succeeded += 1,
                ExecutionStatus::Failed => counts.failed += 1,
                ExecutionStatus::Cancelled => counts.cancelled += 1,
            }
        }
        Ok(counts)
    }

    async fn put_flow(&self, definition: &WorkflowDefinition) -> Result<(), ConveyorError> {
        let mut state = self.state.lock().await;
        if state.flows.contains_key(&definition.flow_id) {
            return Err(ConveyorError::FlowAlreadyRegistered(
                definition.flow_id.clone(),
            ));
        }
        state
            .flows
            .insert(definition.flow_id.clone(), definition.clone());
        Ok(())
    }

    async fn get_flow(&self, flow_id: &FlowId) -> Result<WorkflowDefinition, ConveyorError> {
        let state = self.state.lock().await;
        state
            .flows
            .get(flow_id)
            .cloned()
            .ok_or_else(|| ConveyorError::UnknownFlow(flow_id.clone()))
    }

    async fn list_flows(&self) -> Result<Vec<WorkflowDefinition>, ConveyorError> {
        let state = self.state.lock().await;
        let mut flows: Vec<_> = state.flows.values().cloned().collect();
        flows.sort_by(|a, b| a.flow_id.as_str().cmp(b.flow_id.as_str()));
        Ok(flows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FailureInfo;

    fn record() -> ExecutionRecord {
        ExecutionRecord::new(ExecutionId::generate(), FlowId::new("f1"))
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = InMemoryStore::new();
        let rec = record();
        store.insert(&rec).await.unwrap();

        let got = store.get(rec.execution_id).await.unwrap();
        assert_eq!(got, rec);
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let store = InMemoryStore::new();
        let rec = record();
        store.insert(&rec).await.unwrap();
        assert!(store.insert(&rec).await.is_err());
    }

    #[tokio::test]
    async fn get_unknown_execution() {
        let store = InMemoryStore::new();
        let err = store.get(ExecutionId::generate()).await.unwrap_err();
        assert!(matches!(err, ConveyorError::UnknownExecution(_)));
    }

    #[tokio::test]
    async fn apply_walks_the_state_machine() {
        let store = InMemoryStore::new();
        let rec = record();
        store.insert(&rec).await.unwrap();

        let rec = store
            .apply(rec.execution_id, Transition::Enqueued)
            .await
            .unwrap();
        assert_eq!(rec.status, ExecutionStatus::Queued);

        let rec = store
            .apply(rec.execution_id, Transition::Started { redelivered: false })
            .await
            .unwrap();
        assert_eq!(rec.status, ExecutionStatus::Running);
        assert_eq!(rec.attempt_count, 1);
    }

    #[tokio::test]
    async fn apply_rejects_invalid_transition() {
        let store = InMemoryStore::new();
        let rec = record();
        store.insert(&rec).await.unwrap();

        // Pending -> Succeeded is not a thing.
        let err = store
            .apply(
                rec.execution_id,
                Transition::Succeeded {
                    result: serde_json::Value::Null,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConveyorError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn request_cancel_only_flags_running_records() {
        let store = InMemoryStore::new();
        let rec = record();
        store.insert(&rec).await.unwrap();

        let got = store.request_cancel(rec.execution_id).await.unwrap();
        assert!(!got.cancel_requested);

        store
            .apply(rec.execution_id, Transition::Enqueued)
            .await
            .unwrap();
        store
            .apply(rec.execution_id, Transition::Started { redelivered: false })
            .await
            .unwrap();

        let got = store.request_cancel(rec.execution_id).await.unwrap();
        assert!(got.cancel_requested);
    }

    #[tokio::test]
    async fn counts_by_status() {
        let store = InMemoryStore::new();

        let a = record();
        store.insert(&a).await.unwrap();

        let b = record();
        store.insert(&b).await.unwrap();
        store.apply(b.execution_id, Transition::Enqueued).await.unwrap();

        let c = record();
        store.insert(&c).await.unwrap();
        store
            .apply(
                c.execution_id,
                Transition::Failed {
                    failure: FailureInfo::enqueue("nope"),
                },
            )
            .await
            .unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.running, 0);
    }

    #[tokio::test]
    async fn flow_registry() {
        let store = InMemoryStore::new();
        let def = WorkflowDefinition::new(FlowId::new("f1"), "1", serde_json::json!([]));

        store.put_flow(&def).await.unwrap();
        assert_eq!(store.get_flow(&FlowId::new("f1")).await.unwrap(), def);

        let err = store.put_flow(&def).await.unwrap_err();
        assert!(matches!(err, ConveyorError::FlowAlreadyRegistered(_)));

        let err = store.get_flow(&FlowId::new("missing")).await.unwrap_err();
        assert!(matches!(err, ConveyorError::UnknownFlow(_)));

        assert_eq!(store.list_flows().await.unwrap().len(), 1);
    }
}
