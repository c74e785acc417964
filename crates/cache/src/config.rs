//! Cache configuration loaded from environment variables.

use std::time::Duration;

/// Cache service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `CACHE_KEY_PREFIX`: namespace for cache keys (default: `"hot_cache"`)
/// - `CACHE_DEFAULT_TTL_SECS`: TTL when callers pass none (default: `300`)
/// - `CACHE_INVALIDATION_CHANNEL`: pub/sub channel (default: `"cache_invalidation"`)
/// - `CACHE_FALLBACK_RETRY_SECS`: wait before probing a down store (default: `30`)
/// - `CACHE_WORKFLOW_PREFIX`: namespace for workflow state (default: `"workflow_state"`)
/// - `CACHE_WORKFLOW_TTL_SECS`: workflow state TTL (default: `3600`)
/// - `CACHE_SCAN_BATCH_SIZE`: SCAN/DEL batch size (default: `100`)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub key_prefix: String,
    pub default_ttl: Duration,
    pub invalidation_channel: String,
    pub fallback_retry_interval: Duration,
    pub workflow_prefix: String,
    pub workflow_ttl: Duration,
    pub scan_batch_size: usize,
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
}

impl CacheConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            key_prefix: std::env::var("CACHE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            default_ttl: env_secs("CACHE_DEFAULT_TTL_SECS").unwrap_or(defaults.default_ttl),
            invalidation_channel: std::env::var("CACHE_INVALIDATION_CHANNEL")
                .unwrap_or(defaults.invalidation_channel),
            fallback_retry_interval: env_secs("CACHE_FALLBACK_RETRY_SECS")
                .unwrap_or(defaults.fallback_retry_interval),
            workflow_prefix: std::env::var("CACHE_WORKFLOW_PREFIX")
                .unwrap_or(defaults.workflow_prefix),
            workflow_ttl: env_secs("CACHE_WORKFLOW_TTL_SECS").unwrap_or(defaults.workflow_ttl),
            scan_batch_size: std::env::var("CACHE_SCAN_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.scan_batch_size),
        }
    }

    /// Returns `<key_prefix>:<key>`.
    pub fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Returns the storage key for a workflow's state.
    pub fn workflow_key(&self, workflow_id: &str) -> String {
        format!("{}:{}", self.workflow_prefix, workflow_id)
    }

    /// Returns the channel a workflow's state updates are published on.
    pub fn workflow_channel(&self, workflow_id: &str) -> String {
        format!("{}_updates:{}", self.workflow_prefix, workflow_id)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "hot_cache".to_string(),
            default_ttl: Duration::from_secs(300),
            invalidation_channel: "cache_invalidation".to_string(),
            fallback_retry_interval: Duration::from_secs(30),
            workflow_prefix: "workflow_state".to_string(),
            workflow_ttl: Duration::from_secs(3600),
            scan_batch_size: 100,
        }
    }
}
