//! Generic saga coordinator.
//!
//! A saga is an ordered list of [`SagaStep`]s, each a forward action paired
//! with a compensation. The [`SagaCoordinator`] runs the actions in order;
//! if one fails, no later action runs and the completed steps are
//! compensated in reverse order, each compensation retried with backoff.
//! An action may return [`StepSkipped`] to record that it deliberately did
//! nothing; the saga continues and the step is never compensated.
//! Compensation is best effort: a compensation that keeps failing is
//! recorded and the remaining steps are still compensated.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod outcome;
pub mod step;

pub use common::{BoxError, SagaId, StepStatus, TransactionStatus};
pub use config::SagaConfig;
pub use coordinator::{SagaCoordinator, validate_steps};
pub use error::{SagaError, StepSkipped};
pub use outcome::SagaOutcome;
pub use step::{CleanupAction, SagaStep, StepFuture};
