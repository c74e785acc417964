//! Coordinator configuration loaded from environment variables.

use std::time::Duration;

/// Saga coordinator configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `SAGA_MAX_COMPENSATION_RETRIES`: attempts per compensation (default: `3`)
/// - `SAGA_RETRY_BACKOFF_MS`: base backoff between attempts (default: `100`)
/// - `SAGA_MAX_BACKOFF_MS`: backoff ceiling (default: `2000`)
#[derive(Debug, Clone)]
pub struct SagaConfig {
    pub max_compensation_retries: u32,
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
}

impl SagaConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_compensation_retries: std::env::var("SAGA_MAX_COMPENSATION_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_compensation_retries),
            retry_backoff: std::env::var("SAGA_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            max_backoff: std::env::var("SAGA_MAX_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
        }
    }

    /// Total attempts allowed for one compensation. Never less than one.
    pub fn compensation_attempts(&self) -> u32 {
        self.max_compensation_retries.max(1)
    }

    /// Delay before the attempt following failed attempt number `attempt`.
    ///
    /// Linear in the attempt number and capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff
            .saturating_mul(attempt)
            .min(self.max_backoff)
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            max_compensation_retries: 3,
            retry_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}
