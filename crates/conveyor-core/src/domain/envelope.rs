//! Task envelope: the unit of dispatch sent through the broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ExecutionId, FlowId};
use crate::error::ConveyorError;

/// Wire-independent representation of one dispatched execution.
///
/// The payload is opaque: the envelope never interprets it, it only
/// carries it to whatever runs the workflow. Serialization must round-trip
/// without loss (the broker stores the serialized form).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    execution_id: ExecutionId,
    flow_id: FlowId,
    payload: serde_json::Value,

    /// Attempts already completed when this envelope was enqueued.
    /// Informational; the record's counter is authoritative.
    attempt_count: u32,

    enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(execution_id: ExecutionId, flow_id: FlowId, payload: serde_json::Value) -> Self {
        Self {
            execution_id,
            flow_id,
            payload,
            attempt_count: 0,
            enqueued_at: Utc::now(),
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn flow_id(&self) -> &FlowId {
        &self.flow_id
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Reject envelopes that cannot possibly be routed. Both ends of the
    /// broker call this: enqueue refuses to publish garbage, dequeue
    /// refuses to hand it to an executor.
    pub fn validate(&self) -> Result<(), ConveyorError> {
        if self.execution_id.is_nil() {
            return Err(ConveyorError::InvalidEnvelope(
                "execution_id must not be nil".to_string(),
            ));
        }
        if self.flow_id.is_empty() {
            return Err(ConveyorError::InvalidEnvelope(
                "flow_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn envelope() -> TaskEnvelope {
        TaskEnvelope::new(
            ExecutionId::generate(),
            FlowId::new("report-sync"),
            serde_json::json!({"depth": 3, "tags": ["a", "b"]}),
        )
    }

    #[test]
    fn valid_envelope_passes() {
        assert!(envelope().validate().is_ok());
    }

    #[test]
    fn nil_execution_id_rejected() {
        let env = TaskEnvelope::new(
            ExecutionId::from_ulid(Ulid::nil()),
            FlowId::new("report-sync"),
            serde_json::json!({}),
        );
        assert!(matches!(
            env.validate(),
            Err(ConveyorError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn empty_flow_id_rejected() {
        let env = TaskEnvelope::new(
            ExecutionId::generate(),
            FlowId::new(""),
            serde_json::json!({}),
        );
        assert!(matches!(
            env.validate(),
            Err(ConveyorError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn serde_round_trip_preserves_identity_and_payload() {
        let env = envelope();

        let bytes = serde_json::to_vec(&env).unwrap();
        let back: TaskEnvelope = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(back.execution_id(), env.execution_id());
        assert_eq!(back.flow_id(), env.flow_id());
        assert_eq!(back.payload(), env.payload());
        assert_eq!(back, env);
    }
}
