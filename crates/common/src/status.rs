//! Saga step and transaction status.

use serde::{Deserialize, Serialize};

/// The status of a single saga step.
///
/// Transitions are one-directional:
/// ```text
/// Pending ──┬──► Completed ──┬──► Compensated
///           │                └──► CompensationFailed
///           ├──► Failed
///           └──► Skipped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// The step has not run yet.
    #[default]
    Pending,

    /// The forward action succeeded.
    Completed,

    /// The forward action failed (terminal state).
    Failed,

    /// The compensation undid a completed action (terminal state).
    Compensated,

    /// Every compensation attempt failed (terminal state).
    CompensationFailed,

    /// The action declined to run its side effect; nothing to compensate
    /// (terminal state).
    Skipped,
}

impl StepStatus {
    /// Returns true if the step's compensation may run.
    pub fn can_compensate(&self) -> bool {
        matches!(self, StepStatus::Completed)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Failed
                | StepStatus::Compensated
                | StepStatus::CompensationFailed
                | StepStatus::Skipped
        )
    }

    /// Returns true if moving from this status to `next` is allowed.
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Completed)
                | (StepStatus::Pending, StepStatus::Failed)
                | (StepStatus::Pending, StepStatus::Skipped)
                | (StepStatus::Completed, StepStatus::Compensated)
                | (StepStatus::Completed, StepStatus::CompensationFailed)
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Compensated => "COMPENSATED",
            StepStatus::CompensationFailed => "COMPENSATION_FAILED",
            StepStatus::Skipped => "SKIPPED",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The final status of a saga transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Every step completed.
    Completed,
    /// A step failed and compensation ran.
    Failed,
}

impl TransactionStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    /// Parses the persisted form produced by [`TransactionStatus::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "COMPLETED" => Some(TransactionStatus::Completed),
            "FAILED" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(StepStatus::default(), StepStatus::Pending);
    }

    #[test]
    fn test_can_compensate() {
        assert!(!StepStatus::Pending.can_compensate());
        assert!(StepStatus::Completed.can_compensate());
        assert!(!StepStatus::Failed.can_compensate());
        assert!(!StepStatus::Compensated.can_compensate());
        assert!(!StepStatus::CompensationFailed.can_compensate());
        assert!(!StepStatus::Skipped.can_compensate());
    }

    #[test]
    fn test_transitions_are_one_directional() {
        assert!(StepStatus::Pending.can_transition_to(StepStatus::Completed));
        assert!(StepStatus::Pending.can_transition_to(StepStatus::Failed));
        assert!(StepStatus::Completed.can_transition_to(StepStatus::Compensated));
        assert!(StepStatus::Completed.can_transition_to(StepStatus::CompensationFailed));

        assert!(!StepStatus::Completed.can_transition_to(StepStatus::Pending));
        assert!(!StepStatus::Failed.can_transition_to(StepStatus::Pending));
        assert!(!StepStatus::Failed.can_transition_to(StepStatus::Compensated));
        assert!(!StepStatus::Compensated.can_transition_to(StepStatus::Completed));
        assert!(!StepStatus::Pending.can_transition_to(StepStatus::Compensated));
    }

    #[test]
    fn test_skipped_is_reachable_only_from_pending() {
        assert!(StepStatus::Pending.can_transition_to(StepStatus::Skipped));
        assert!(!StepStatus::Completed.can_transition_to(StepStatus::Skipped));
        assert!(!StepStatus::Skipped.can_transition_to(StepStatus::Compensated));
        assert!(StepStatus::Skipped.is_terminal());
        assert_eq!(
            serde_json::to_string(&StepStatus::Skipped).unwrap(),
            "\"SKIPPED\""
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Completed.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Compensated.is_terminal());
        assert!(StepStatus::CompensationFailed.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(StepStatus::Pending.to_string(), "PENDING");
        assert_eq!(
            StepStatus::CompensationFailed.to_string(),
            "COMPENSATION_FAILED"
        );
        assert_eq!(TransactionStatus::Failed.to_string(), "FAILED");
    }

    #[test]
    fn test_serialization_matches_display() {
        let json = serde_json::to_string(&StepStatus::CompensationFailed).unwrap();
        assert_eq!(json, "\"COMPENSATION_FAILED\"");
        let deserialized: StepStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, StepStatus::CompensationFailed);
    }

    #[test]
    fn test_transaction_status_parse() {
        assert_eq!(
            TransactionStatus::parse("COMPLETED"),
            Some(TransactionStatus::Completed)
        );
        assert_eq!(
            TransactionStatus::parse(TransactionStatus::Failed.as_str()),
            Some(TransactionStatus::Failed)
        );
        assert_eq!(TransactionStatus::parse("running"), None);
    }
}
