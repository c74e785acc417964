//! Saga steps: a named forward action paired with its compensation.

use std::future::Future;

use chrono::{DateTime, Utc};
use common::{BoxError, StepStatus};
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use store::StepRecord;

/// Future returned by step actions and compensations.
pub type StepFuture<T> = BoxFuture<'static, Result<T, BoxError>>;

type ActionFn = Box<dyn Fn() -> StepFuture<Option<Value>> + Send + Sync>;
type CompensationFn = Box<dyn Fn() -> StepFuture<()> + Send + Sync>;

/// One step of a saga.
///
/// The action and compensation are zero-argument async closures. Their
/// errors are converted to strings at the step boundary; the coordinator only
/// ever sees `Ok`/`Err`. Status moves forward only:
/// `Pending → Completed | Failed | Skipped`,
/// `Completed → Compensated | CompensationFailed`.
pub struct SagaStep {
    name: String,
    action: ActionFn,
    compensation: CompensationFn,
    status: StepStatus,
    result: Option<Value>,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    compensation_attempts: u32,
}

impl SagaStep {
    /// Creates a step from an action and the compensation that undoes it.
    ///
    /// The action's success value is serialized into the step result; a
    /// value serializing to `null` (such as `()`) is stored as `None`.
    pub fn new<A, AFut, R, AErr, C, CFut, CErr>(
        name: impl Into<String>,
        action: A,
        compensation: C,
    ) -> Self
    where
        A: Fn() -> AFut + Send + Sync + 'static,
        AFut: Future<Output = Result<R, AErr>> + Send + 'static,
        R: Serialize,
        AErr: Into<BoxError>,
        C: Fn() -> CFut + Send + Sync + 'static,
        CFut: Future<Output = Result<(), CErr>> + Send + 'static,
        CErr: Into<BoxError>,
    {
        let action: ActionFn = Box::new(move || -> StepFuture<Option<Value>> {
            let fut = action();
            Box::pin(async move { into_step_result(fut.await) })
        });

        let compensation: CompensationFn = Box::new(move || -> StepFuture<()> {
            let fut = compensation();
            Box::pin(async move { fut.await.map_err(boxed) })
        });

        Self {
            name: name.into(),
            action,
            compensation,
            status: StepStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            compensation_attempts: 0,
        }
    }

    /// Creates a step whose compensation does nothing.
    pub fn without_compensation<A, AFut, R, AErr>(name: impl Into<String>, action: A) -> Self
    where
        A: Fn() -> AFut + Send + Sync + 'static,
        AFut: Future<Output = Result<R, AErr>> + Send + 'static,
        R: Serialize,
        AErr: Into<BoxError>,
    {
        Self::new(name, action, || async { Ok::<(), BoxError>(()) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    /// The serialized action result, if the action completed with a value.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// The action's error message, or the last compensation error if every
    /// compensation attempt failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// How many times the compensation was invoked.
    pub fn compensation_attempts(&self) -> u32 {
        self.compensation_attempts
    }

    /// Returns the persisted view of this step.
    pub fn to_record(&self) -> StepRecord {
        StepRecord {
            name: self.name.clone(),
            status: self.status,
            error: self.error.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }

    pub(crate) fn run_action(&self) -> StepFuture<Option<Value>> {
        (self.action)()
    }

    pub(crate) fn run_compensation(&self) -> StepFuture<()> {
        (self.compensation)()
    }

    pub(crate) fn mark_started(&mut self) {
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn mark_completed(&mut self, result: Option<Value>) {
        if self.transition(StepStatus::Completed) {
            self.result = result;
            self.completed_at = Some(Utc::now());
        }
    }

    pub(crate) fn mark_failed(&mut self, error: String) {
        if self.transition(StepStatus::Failed) {
            self.error = Some(error);
        }
    }

    pub(crate) fn mark_skipped(&mut self, reason: String) {
        if self.transition(StepStatus::Skipped) {
            self.error = Some(reason);
            self.completed_at = Some(Utc::now());
        }
    }

    pub(crate) fn record_compensation_attempt(&mut self) {
        self.compensation_attempts += 1;
    }

    pub(crate) fn mark_compensated(&mut self) {
        self.transition(StepStatus::Compensated);
    }

    pub(crate) fn mark_compensation_failed(&mut self, error: String) {
        if self.transition(StepStatus::CompensationFailed) {
            self.error = Some(error);
        }
    }

    fn transition(&mut self, next: StepStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                step = %self.name,
                from = %self.status,
                to = %next,
                "refusing invalid step status transition"
            );
            return false;
        }
        self.status = next;
        true
    }
}

impl std::fmt::Debug for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaStep")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("result", &self.result)
            .field("error", &self.error)
            .field("started_at", &self.started_at)
            .field("completed_at", &self.completed_at)
            .field("compensation_attempts", &self.compensation_attempts)
            .finish_non_exhaustive()
    }
}

fn boxed<E: Into<BoxError>>(e: E) -> BoxError {
    e.into()
}

fn into_step_result<R: Serialize, E: Into<BoxError>>(
    result: Result<R, E>,
) -> Result<Option<Value>, BoxError> {
    let value = result.map_err(boxed)?;
    match serde_json::to_value(value) {
        Ok(value) => Ok(Some(value).filter(|v| !v.is_null())),
        Err(e) => {
            tracing::warn!(error = %e, "discarding step result that does not serialize");
            Ok(None)
        }
    }
}

/// A named ad hoc cleanup callable for
/// [`SagaCoordinator::cleanup_partial_state`](crate::SagaCoordinator::cleanup_partial_state).
pub struct CleanupAction {
    name: String,
    run: Box<dyn FnOnce() -> StepFuture<()> + Send>,
}

impl CleanupAction {
    /// Creates a cleanup action.
    pub fn new<F, Fut, E>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            name: name.into(),
            run: Box::new(move || -> StepFuture<()> {
                Box::pin(async move { f().await.map_err(boxed) })
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_future(self) -> (String, StepFuture<()>) {
        let fut = (self.run)();
        (self.name, fut)
    }
}

impl std::fmt::Debug for CleanupAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupAction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
