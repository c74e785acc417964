//! Saga coordinator for orchestrating multi-step sagas.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{SagaId, StepStatus, TransactionStatus};
use store::{SagaLog, SagaLogRecord};

use crate::config::SagaConfig;
use crate::error::{SagaError, StepSkipped};
use crate::outcome::SagaOutcome;
use crate::step::{CleanupAction, SagaStep};

/// Orchestrates the execution of sagas.
///
/// Steps run strictly in order. When a step's action fails, no later step
/// runs and every completed step is compensated in reverse order, each
/// compensation retried with linear backoff. Separate sagas share nothing,
/// so one coordinator can drive any number of them concurrently.
#[derive(Clone, Default)]
pub struct SagaCoordinator {
    config: SagaConfig,
    log: Option<Arc<dyn SagaLog>>,
}

impl SagaCoordinator {
    /// Creates a coordinator without a transaction log.
    pub fn new(config: SagaConfig) -> Self {
        Self { config, log: None }
    }

    /// Persists every finished transaction to `log` (best effort).
    pub fn with_log(mut self, log: Arc<dyn SagaLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Returns a fresh saga ID.
    pub fn generate_saga_id(&self) -> SagaId {
        SagaId::new()
    }

    /// Executes a saga, returning true only if every step completed.
    ///
    /// Never fails: the outcome of each step is recorded on `steps`.
    pub async fn execute_saga(&self, saga_id: SagaId, steps: &mut [SagaStep]) -> bool {
        self.run_saga(saga_id, steps).await.is_completed()
    }

    /// Executes a saga and reports how it ended.
    #[tracing::instrument(skip(self, steps), fields(step_count = steps.len()))]
    pub async fn run_saga(&self, saga_id: SagaId, steps: &mut [SagaStep]) -> SagaOutcome {
        if let Err(e) = validate_steps(steps) {
            tracing::warn!(%saga_id, error = %e, "saga rejected");
            return SagaOutcome::Rejected {
                reason: e.to_string(),
            };
        }

        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = std::time::Instant::now();
        let started_at = Utc::now();

        for index in 0..steps.len() {
            let step = &mut steps[index];
            tracing::info!(step = step.name(), index, "saga step started");
            step.mark_started();

            match step.run_action().await {
                Ok(result) => {
                    step.mark_completed(result);
                    tracing::debug!(step = step.name(), "saga step completed");
                }
                Err(e) => {
                    if let Some(skip) = e.downcast_ref::<StepSkipped>() {
                        tracing::info!(step = step.name(), reason = %skip.reason, "saga step skipped");
                        step.mark_skipped(skip.reason.clone());
                        continue;
                    }

                    let failed_step = step.name().to_string();
                    let err = SagaError::StepFailed {
                        step: failed_step.clone(),
                        reason: e.to_string(),
                    };
                    tracing::warn!(%saga_id, error = %err, "saga step failed");
                    step.mark_failed(e.to_string());

                    let fully_compensated = self.compensate(saga_id, steps).await;
                    self.log_transaction(saga_id, steps, TransactionStatus::Failed, started_at)
                        .await;

                    metrics::histogram!("saga_duration_seconds")
                        .record(saga_start.elapsed().as_secs_f64());
                    metrics::counter!("saga_failed").increment(1);

                    if fully_compensated {
                        return SagaOutcome::Compensated { failed_step };
                    }
                    let unrecovered: Vec<String> = steps
                        .iter()
                        .filter(|s| s.status() == StepStatus::CompensationFailed)
                        .map(|s| s.name().to_string())
                        .collect();
                    tracing::error!(%saga_id, ?unrecovered, "saga left unrecovered partial state");
                    return SagaOutcome::CompensationIncomplete {
                        failed_step,
                        unrecovered,
                    };
                }
            }
        }

        self.log_transaction(saga_id, steps, TransactionStatus::Completed, started_at)
            .await;

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        metrics::counter!("saga_completed").increment(1);
        tracing::info!(%saga_id, duration, "saga completed successfully");

        SagaOutcome::Completed
    }

    /// Runs compensations for completed steps in reverse order.
    ///
    /// A compensation that exhausts its retries leaves its step in
    /// `CompensationFailed` and does not stop earlier steps from being
    /// compensated. Returns true only if no step ended `CompensationFailed`.
    #[tracing::instrument(skip(self, steps))]
    pub async fn compensate(&self, saga_id: SagaId, steps: &mut [SagaStep]) -> bool {
        let mut all_compensated = true;

        for step in steps.iter_mut().rev() {
            if !step.status().can_compensate() {
                continue;
            }
            if !self.compensate_step(saga_id, step).await {
                all_compensated = false;
            }
        }

        all_compensated
    }

    async fn compensate_step(&self, saga_id: SagaId, step: &mut SagaStep) -> bool {
        let max_attempts = self.config.compensation_attempts();

        for attempt in 1..=max_attempts {
            step.record_compensation_attempt();

            match step.run_compensation().await {
                Ok(()) => {
                    step.mark_compensated();
                    tracing::info!(step = step.name(), attempt, "compensation step completed");
                    return true;
                }
                Err(e) => {
                    let err = SagaError::CompensationFailed {
                        step: step.name().to_string(),
                        reason: e.to_string(),
                    };

                    if attempt == max_attempts {
                        tracing::error!(
                            %saga_id,
                            attempts = attempt,
                            error = %err,
                            "compensation retries exhausted"
                        );
                        metrics::counter!("saga_compensation_failures").increment(1);
                        step.mark_compensation_failed(e.to_string());
                        return false;
                    }

                    let delay = self.config.backoff_for(attempt);
                    tracing::warn!(
                        %saga_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "compensation attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        false
    }

    /// Appends the transaction to the saga log, if one is configured.
    ///
    /// Failures are logged and swallowed.
    pub async fn log_transaction(
        &self,
        saga_id: SagaId,
        steps: &[SagaStep],
        final_status: TransactionStatus,
        started_at: DateTime<Utc>,
    ) {
        let Some(log) = &self.log else {
            return;
        };

        let record = SagaLogRecord {
            saga_id,
            steps: steps.iter().map(SagaStep::to_record).collect(),
            final_status,
            started_at,
            finished_at: Utc::now(),
        };

        if let Err(e) = log.record(&record).await {
            tracing::error!(%saga_id, error = %e, "failed to persist saga transaction log");
        }
    }

    /// Runs ad hoc cleanup actions in order, continuing past failures.
    ///
    /// Returns true only if every action succeeded.
    #[tracing::instrument(skip(self, cleanup_actions))]
    pub async fn cleanup_partial_state(
        &self,
        saga_id: SagaId,
        cleanup_actions: Vec<CleanupAction>,
    ) -> bool {
        let mut failures = Vec::new();

        for action in cleanup_actions {
            let (name, fut) = action.into_future();
            if let Err(e) = fut.await {
                tracing::warn!(%saga_id, action = %name, error = %e, "cleanup action failed");
                failures.push(name);
            }
        }

        if !failures.is_empty() {
            tracing::error!(%saga_id, ?failures, "partial state cleanup incomplete");
        }
        failures.is_empty()
    }
}

/// Checks a step list before execution.
///
/// Rejects empty lists, duplicate step names, and steps that already ran.
pub fn validate_steps(steps: &[SagaStep]) -> Result<(), SagaError> {
    if steps.is_empty() {
        return Err(SagaError::Validation(
            "saga must contain at least one step".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.name()) {
            return Err(SagaError::Validation(format!(
                "duplicate step name '{}'",
                step.name()
            )));
        }
        if step.status() != StepStatus::Pending {
            return Err(SagaError::Validation(format!(
                "step '{}' already ran (status {})",
                step.name(),
                step.status()
            )));
        }
    }

    Ok(())
}
