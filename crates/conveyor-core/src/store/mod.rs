//! Execution store: persistent source of truth for records and flows.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ExecutionId, ExecutionRecord, FlowId, Transition, WorkflowDefinition};
use crate::error::ConveyorError;

/// Counts by status, for observability endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionCounts {
    pub pending: usize,
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Store port.
///
/// The API process and every worker process write through this interface
/// and nothing else; the atomic `apply` is the single mutation path for
/// records, so concurrent writers serialize per execution_id and a stale
/// writer loses instead of overwriting.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist a freshly created record. Exactly one record may exist per
    /// execution_id.
    async fn insert(&self, record: &ExecutionRecord) -> Result<(), ConveyorError>;

    /// Atomically apply a transition and return the updated record.
    /// `InvalidTransition` when the current status does not allow it (or a
    /// concurrent writer got there first); `UnknownExecution` when absent.
    async fn apply(
        &self,
        execution_id: ExecutionId,
        transition: Transition,
    ) -> Result<ExecutionRecord, ConveyorError>;

    /// Consistent read-only snapshot.
    async fn get(&self, execution_id: ExecutionId) -> Result<ExecutionRecord, ConveyorError>;

    /// Flag a Running execution for cooperative cancellation and return
    /// the updated record. No-op on records in any other state.
    async fn request_cancel(
        &self,
        execution_id: ExecutionId,
    ) -> Result<ExecutionRecord, ConveyorError>;

    async fn counts(&self) -> Result<ExecutionCounts, ConveyorError>;

    /// Register an immutable workflow definition.
    /// `FlowAlreadyRegistered` on a duplicate flow_id.
    async fn put_flow(&self, definition: &WorkflowDefinition) -> Result<(), ConveyorError>;

    async fn get_flow(&self, flow_id: &FlowId) -> Result<WorkflowDefinition, ConveyorError>;

    async fn list_flows(&self) -> Result<Vec<WorkflowDefinition>, ConveyorError>;
}
