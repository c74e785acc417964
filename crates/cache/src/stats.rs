//! Hit, miss, write and notification counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// The layer a lookup was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLayer {
    Volatile,
    Durable,
}

impl CacheLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLayer::Volatile => "volatile",
            CacheLayer::Durable => "durable",
        }
    }
}

/// Monotonic counters shared by every clone of a cache service.
///
/// Each increment is also mirrored to the `metrics` facade.
#[derive(Debug, Default)]
pub struct CacheStats {
    volatile_hits: AtomicU64,
    volatile_misses: AtomicU64,
    durable_hits: AtomicU64,
    durable_misses: AtomicU64,
    write_successes: AtomicU64,
    write_failures: AtomicU64,
    fallback_activations: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_received: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, layer: CacheLayer) {
        let counter = match layer {
            CacheLayer::Volatile => &self.volatile_hits,
            CacheLayer::Durable => &self.durable_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cache_hits_total", "layer" => layer.as_str()).increment(1);
    }

    pub fn record_miss(&self, layer: CacheLayer) {
        let counter = match layer {
            CacheLayer::Volatile => &self.volatile_misses,
            CacheLayer::Durable => &self.durable_misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cache_misses_total", "layer" => layer.as_str()).increment(1);
    }

    pub fn record_write(&self, success: bool) {
        let (counter, result) = if success {
            (&self.write_successes, "success")
        } else {
            (&self.write_failures, "failure")
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cache_writes_total", "result" => result).increment(1);
    }

    pub fn record_fallback_activation(&self) {
        self.fallback_activations.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cache_fallback_activations_total").increment(1);
    }

    pub fn record_notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cache_notifications_sent_total").increment(1);
    }

    pub fn record_notification_received(&self) {
        self.notifications_received.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cache_notifications_received_total").increment(1);
    }

    /// Returns a point-in-time copy of every counter.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            volatile_hits: self.volatile_hits.load(Ordering::Relaxed),
            volatile_misses: self.volatile_misses.load(Ordering::Relaxed),
            durable_hits: self.durable_hits.load(Ordering::Relaxed),
            durable_misses: self.durable_misses.load(Ordering::Relaxed),
            write_successes: self.write_successes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            fallback_activations: self.fallback_activations.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_received: self.notifications_received.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub volatile_hits: u64,
    pub volatile_misses: u64,
    pub durable_hits: u64,
    pub durable_misses: u64,
    pub write_successes: u64,
    pub write_failures: u64,
    pub fallback_activations: u64,
    pub notifications_sent: u64,
    pub notifications_received: u64,
}

impl CacheStatsSnapshot {
    /// Fraction of volatile lookups that hit, or `0.0` before any lookup.
    pub fn volatile_hit_ratio(&self) -> f64 {
        let total = self.volatile_hits + self.volatile_misses;
        if total == 0 {
            0.0
        } else {
            self.volatile_hits as f64 / total as f64
        }
    }
}
