//! Saga execution outcome.

/// How a saga run ended.
///
/// `execute_saga` collapses this to a boolean. Callers that alert on
/// unrecovered partial state should use `run_saga` and check
/// [`SagaOutcome::needs_attention`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaOutcome {
    /// Every step completed.
    Completed,

    /// A step failed and every completed step was compensated.
    Compensated { failed_step: String },

    /// A step failed and at least one compensation exhausted its retries.
    CompensationIncomplete {
        failed_step: String,
        unrecovered: Vec<String>,
    },

    /// The step list was invalid; nothing ran.
    Rejected { reason: String },
}

impl SagaOutcome {
    /// Returns true if every step completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, SagaOutcome::Completed)
    }

    /// Returns true if side effects may remain that nothing undid.
    pub fn needs_attention(&self) -> bool {
        matches!(self, SagaOutcome::CompensationIncomplete { .. })
    }

    /// Returns the name of the step whose action failed, if any.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            SagaOutcome::Compensated { failed_step }
            | SagaOutcome::CompensationIncomplete { failed_step, .. } => Some(failed_step),
            _ => None,
        }
    }
}
