//! Saga error types.

use thiserror::Error;

/// Errors that can occur during saga operations.
///
/// The coordinator never returns these from `execute_saga` or `compensate`;
/// step failures are recorded on the steps themselves. They surface through
/// [`validate_steps`](crate::validate_steps) and in log output.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The caller supplied an invalid step list.
    #[error("Invalid saga: {0}")]
    Validation(String),

    /// A saga step's forward action failed.
    #[error("Saga step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    /// A compensation step failed.
    #[error("Compensation step '{step}' failed: {reason}")]
    CompensationFailed { step: String, reason: String },
}

/// Returned by a step action that chose not to perform its side effect.
///
/// The coordinator records the step as `Skipped` with `reason` as its error
/// and moves on to the next step; a skipped step is never compensated.
#[derive(Debug, Error)]
#[error("step skipped: {reason}")]
pub struct StepSkipped {
    pub reason: String,
}

impl StepSkipped {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
