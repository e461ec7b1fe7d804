//! Domain model: identifiers, envelopes, records, and the state machine.

mod envelope;
mod failure;
mod flow;
mod ids;
mod record;
mod state;

pub use envelope::TaskEnvelope;
pub use failure::{FailureInfo, FailureKind};
pub use flow::WorkflowDefinition;
pub use ids::{Execution, ExecutionId, FlowId, Id, IdMarker};
pub use record::{ExecutionRecord, Transition};
pub use state::ExecutionStatus;
