//! Shared types used across the store, saga, and cache crates.

pub mod status;
pub mod types;

pub use status::{StepStatus, TransactionStatus};
pub use types::{BoxError, SagaId};
