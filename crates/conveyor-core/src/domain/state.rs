//! Execution state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an execution.
///
/// Transitions:
/// - Pending -> Queued -> Running -> Succeeded
/// - Running -> Queued (retry after a recoverable failure, until the
///   attempt ceiling)
/// - Pending/Queued/Running -> Failed
/// - Pending/Queued/Running -> Cancelled
///
/// Terminal states accept no further transitions. Every mutation goes
/// through [`Transition`](super::record::Transition); nothing writes the
/// status field directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Record created, envelope not yet handed to the broker.
    Pending,

    /// Envelope accepted by the broker, waiting for an executor.
    Queued,

    /// An executor is running the workflow logic.
    Running,

    /// Completed successfully; `result` is populated.
    Succeeded,

    /// Failed permanently; `error` is populated.
    Failed,

    /// Cancelled before (or during) execution.
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal states are immutable.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Stable string form, shared by the JSON wire format and the store.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "queued" => Ok(ExecutionStatus::Queued),
            "running" => Ok(ExecutionStatus::Running),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status \"{other}\"")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::succeeded(ExecutionStatus::Succeeded)]
    #[case::failed(ExecutionStatus::Failed)]
    #[case::cancelled(ExecutionStatus::Cancelled)]
    fn terminal_states(#[case] status: ExecutionStatus) {
        assert!(status.is_terminal());
    }

    #[rstest]
    #[case::pending(ExecutionStatus::Pending)]
    #[case::queued(ExecutionStatus::Queued)]
    #[case::running(ExecutionStatus::Running)]
    fn non_terminal_states(#[case] status: ExecutionStatus) {
        assert!(!status.is_terminal());
    }

    #[rstest]
    #[case(ExecutionStatus::Pending)]
    #[case(ExecutionStatus::Queued)]
    #[case(ExecutionStatus::Running)]
    #[case(ExecutionStatus::Succeeded)]
    #[case(ExecutionStatus::Failed)]
    #[case(ExecutionStatus::Cancelled)]
    fn string_form_round_trips(#[case] status: ExecutionStatus) {
        assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
    }

    #[test]
    fn json_form_matches_store_form() {
        let json = serde_json::to_string(&ExecutionStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
