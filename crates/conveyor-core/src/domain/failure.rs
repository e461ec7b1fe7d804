//! Structured failure payload attached to FAILED records.
//!
//! A poller must be able to tell a retry-ceiling failure apart from an
//! ordinary workflow failure, so the kind travels with the record instead
//! of being flattened into a message string.

use serde::{Deserialize, Serialize};

/// Why an execution ended up FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The workflow logic itself returned an error.
    Execution,

    /// The workflow logic exceeded the per-execution deadline.
    Timeout,

    /// The attempt ceiling was reached; `message` carries the last error.
    MaxRetriesExceeded,

    /// The envelope could not be handed to the broker at submit time.
    Enqueue,
}

/// Failure detail stored on the record and returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: FailureKind,
    pub message: String,

    /// Attempts performed when the failure became terminal.
    pub attempts: u32,
}

impl FailureInfo {
    pub fn execution(message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind: FailureKind::Execution,
            message: message.into(),
            attempts,
        }
    }

    pub fn timeout(message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: message.into(),
            attempts,
        }
    }

    pub fn max_retries_exceeded(last_error: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind: FailureKind::MaxRetriesExceeded,
            message: last_error.into(),
            attempts,
        }
    }

    pub fn enqueue(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Enqueue,
            message: message.into(),
            attempts: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_survives_serde() {
        let info = FailureInfo::max_retries_exceeded("boom", 3);
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("max_retries_exceeded"));

        let back: FailureInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }
}
