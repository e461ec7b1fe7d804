//! Workflow definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::FlowId;
use crate::error::ConveyorError;

/// A named, versioned unit of runnable logic.
///
/// `steps` is an opaque document describing what to run; the coordinator
/// never interprets it, only the runner does. Definitions are immutable
/// once registered: changing a flow means registering a new flow_id (or a
/// new version under a new name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub flow_id: FlowId,
    pub version: String,
    pub steps: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn new(flow_id: FlowId, version: impl Into<String>, steps: serde_json::Value) -> Self {
        Self {
            flow_id,
            version: version.into(),
            steps,
            created_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), ConveyorError> {
        if self.flow_id.is_empty() {
            return Err(ConveyorError::InvalidEnvelope(
                "flow_id must not be empty".to_string(),
            ));
        }
        if self.version.is_empty() {
            return Err(ConveyorError::InvalidEnvelope(
                "version must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_definition_passes() {
        let def = WorkflowDefinition::new(
            FlowId::new("nightly-report"),
            "1",
            serde_json::json!([{"id": "s1", "kind": "log"}]),
        );
        assert!(def.validate().is_ok());
    }

    #[test]
    fn empty_flow_id_rejected() {
        let def = WorkflowDefinition::new(FlowId::new(""), "1", serde_json::Value::Null);
        assert!(def.validate().is_err());
    }

    #[test]
    fn empty_version_rejected() {
        let def = WorkflowDefinition::new(FlowId::new("f"), "", serde_json::Value::Null);
        assert!(def.validate().is_err());
    }
}
