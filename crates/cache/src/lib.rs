//! Multi-layer cache service.
//!
//! [`MultiLayerCacheService`] puts a volatile key/value store in front of a
//! durable store:
//!
//! - reads try the volatile layer and backfill it from the durable layer
//! - writes run as a saga so the two layers cannot diverge on failure
//! - invalidations are broadcast so every process drops matching entries
//! - a volatile outage switches the service to durable-only fallback mode
//!   until a later probe succeeds
//!
//! The same service carries a workflow state channel for publishing and
//! following the progress of long-running workflows.

pub mod config;
pub mod error;
pub mod fallback;
pub mod service;
pub mod stats;
pub mod subscription;
mod workflow;

pub use config::CacheConfig;
pub use error::CacheError;
pub use fallback::{FallbackState, FallbackStatus};
pub use service::{MIN_TTL, MultiLayerCacheService, STEP_DURABLE_WRITE, STEP_VOLATILE_WRITE};
pub use stats::{CacheLayer, CacheStats, CacheStatsSnapshot};
pub use subscription::SubscriptionHandle;
