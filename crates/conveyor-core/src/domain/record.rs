//! Execution record and its single state-transition operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::failure::FailureInfo;
use super::ids::{ExecutionId, FlowId};
use super::state::ExecutionStatus;
use crate::error::ConveyorError;

/// One requested change to an execution record.
///
/// Every writer (coordinator or worker) expresses its update as a
/// `Transition` and hands it to the store; there is no other mutation
/// path. The store applies it atomically against the current status, so
/// concurrent writers serialize and a transition whose source state no
/// longer matches is rejected instead of overwriting.
#[derive(Debug, Clone)]
pub enum Transition {
    /// Pending -> Queued: the broker accepted the envelope.
    Enqueued,

    /// Queued -> Running: an executor claimed the execution and the
    /// attempt counter increments. A redelivered message may also re-claim
    /// a record stranded in Running by an executor that died before ack.
    Started { redelivered: bool },

    /// Running -> Succeeded, with the workflow result.
    Succeeded { result: serde_json::Value },

    /// Pending/Queued/Running -> Failed, with structured failure detail.
    Failed { failure: FailureInfo },

    /// Running -> Queued: recoverable failure, waiting for redelivery.
    Requeued,

    /// Pending/Queued/Running -> Cancelled.
    Cancelled,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Enqueued => "enqueued",
            Transition::Started { .. } => "started",
            Transition::Succeeded { .. } => "succeeded",
            Transition::Failed { .. } => "failed",
            Transition::Requeued => "requeued",
            Transition::Cancelled => "cancelled",
        }
    }

    /// Source states this transition may be applied from.
    pub fn allowed_from(&self, from: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match self {
            Transition::Enqueued => matches!(from, Pending),
            Transition::Started { redelivered } => {
                matches!(from, Queued) || (*redelivered && matches!(from, Running))
            }
            Transition::Succeeded { .. } => matches!(from, Running),
            Transition::Failed { .. } => matches!(from, Pending | Queued | Running),
            Transition::Requeued => matches!(from, Running),
            Transition::Cancelled => matches!(from, Pending | Queued | Running),
        }
    }
}

/// Single source of truth for one execution.
///
/// Exactly one record exists per execution_id. Terminal records are
/// immutable. Timestamps are monotonic: submitted <= started <= completed
/// whenever the later ones are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    pub flow_id: FlowId,
    pub status: ExecutionStatus,

    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Present only when status is Succeeded.
    pub result: Option<serde_json::Value>,

    /// Present only when status is Failed.
    pub error: Option<FailureInfo>,

    /// Attempts performed so far; bounded by the configured maximum.
    pub attempt_count: u32,

    /// Set when a client asked to cancel a Running execution. Advisory:
    /// the workflow logic checks it cooperatively.
    pub cancel_requested: bool,
}

impl ExecutionRecord {
    pub fn new(execution_id: ExecutionId, flow_id: FlowId) -> Self {
        Self {
            execution_id,
            flow_id,
            status: ExecutionStatus::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            attempt_count: 0,
            cancel_requested: false,
        }
    }

    /// Apply a transition in place. This is the only way the record
    /// mutates; stores wrap it in their own atomicity (a lock, or a
    /// conditional UPDATE keyed on the current status).
    pub fn apply(&mut self, transition: &Transition) -> Result<(), ConveyorError> {
        if !transition.allowed_from(self.status) {
            return Err(ConveyorError::InvalidTransition {
                execution_id: self.execution_id,
                from: self.status,
                attempted: transition.name(),
            });
        }

        let now = Utc::now();
        match transition {
            Transition::Enqueued => {
                self.status = ExecutionStatus::Queued;
            }
            Transition::Started { .. } => {
                self.status = ExecutionStatus::Running;
                self.attempt_count += 1;
                self.started_at = Some(now);
            }
            Transition::Succeeded { result } => {
                self.status = ExecutionStatus::Succeeded;
                self.result = Some(result.clone());
                self.completed_at = Some(now);
            }
            Transition::Failed { failure } => {
                self.status = ExecutionStatus::Failed;
                self.error = Some(failure.clone());
                self.completed_at = Some(now);
            }
            Transition::Requeued => {
                self.status = ExecutionStatus::Queued;
            }
            Transition::Cancelled => {
                self.status = ExecutionStatus::Cancelled;
                self.completed_at = Some(now);
            }
        }
        Ok(())
    }
}
