//! Degraded-mode state machine for the volatile store.
//!
//! ```text
//! NORMAL --(volatile operation fails)--> DEGRADED
//! DEGRADED --(retry interval elapsed, ping succeeds)--> NORMAL
//! DEGRADED --(retry interval elapsed, ping fails)--> DEGRADED (timer restarts)
//! ```
//!
//! While degraded the cache service skips the volatile store entirely and
//! serves every request from the durable store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use store::VolatileStore;
use tokio::sync::Mutex;

use crate::stats::CacheStats;

#[derive(Debug, Default)]
struct FallbackInner {
    degraded: bool,
    degraded_since: Option<Instant>,
    degraded_at: Option<DateTime<Utc>>,
    last_reason: Option<String>,
}

/// Observable view of the fallback state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackStatus {
    pub is_degraded: bool,
    pub degraded_at: Option<DateTime<Utc>>,
    pub last_reason: Option<String>,
}

/// Shared NORMAL/DEGRADED flag.
///
/// Transitions happen under one async lock, so concurrent failures count as
/// a single activation and at most one caller probes the store at a time.
#[derive(Debug)]
pub struct FallbackState {
    retry_interval: Duration,
    stats: Arc<CacheStats>,
    inner: Mutex<FallbackInner>,
}

impl FallbackState {
    pub fn new(retry_interval: Duration, stats: Arc<CacheStats>) -> Self {
        Self {
            retry_interval,
            stats,
            inner: Mutex::new(FallbackInner::default()),
        }
    }

    pub async fn is_degraded(&self) -> bool {
        self.inner.lock().await.degraded
    }

    pub async fn status(&self) -> FallbackStatus {
        let inner = self.inner.lock().await;
        FallbackStatus {
            is_degraded: inner.degraded,
            degraded_at: inner.degraded_at,
            last_reason: inner.last_reason.clone(),
        }
    }

    /// Marks the volatile store as unreachable.
    ///
    /// Returns true if this call moved the state from NORMAL to DEGRADED.
    /// Failures while already degraded update the reason and restart an
    /// expired retry interval.
    pub async fn enter(&self, reason: &str) -> bool {
        let mut inner = self.inner.lock().await;
        inner.last_reason = Some(reason.to_string());
        if inner.degraded {
            if inner
                .degraded_since
                .is_none_or(|since| since.elapsed() >= self.retry_interval)
            {
                inner.degraded_since = Some(Instant::now());
            }
            return false;
        }

        inner.degraded = true;
        inner.degraded_since = Some(Instant::now());
        inner.degraded_at = Some(Utc::now());
        self.stats.record_fallback_activation();
        tracing::warn!(reason, "volatile store unreachable, entering fallback mode");
        true
    }

    /// Returns true if the volatile store may be used.
    ///
    /// In NORMAL mode this is immediate. In DEGRADED mode the store is
    /// probed once the retry interval has elapsed; a successful probe
    /// returns to NORMAL, a failed one restarts the interval.
    ///
    /// The probe runs while holding the state lock, so concurrent callers in
    /// DEGRADED mode wait for it, at most the store's connection timeout.
    pub async fn try_exit<V>(&self, store: &V) -> bool
    where
        V: VolatileStore + ?Sized,
    {
        let mut inner = self.inner.lock().await;
        if !inner.degraded {
            return true;
        }
        if let Some(since) = inner.degraded_since
            && since.elapsed() < self.retry_interval
        {
            return false;
        }

        match store.ping().await {
            Ok(()) => {
                let outage = inner.degraded_since.map(|since| since.elapsed());
                *inner = FallbackInner::default();
                tracing::info!(?outage, "volatile store reachable again, leaving fallback mode");
                true
            }
            Err(e) => {
                inner.degraded_since = Some(Instant::now());
                inner.last_reason = Some(e.to_string());
                tracing::debug!(error = %e, "volatile store still unreachable");
                false
            }
        }
    }
}
