//! Cache service error types.

use common::BoxError;
use thiserror::Error;

/// Errors surfaced by the cache service.
///
/// Volatile store failures never appear here: they switch the service into
/// fallback mode instead.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Caller-supplied input was rejected before touching any store.
    #[error("Invalid cache request: {0}")]
    Validation(String),

    /// A value could not be serialized for the volatile store.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The caller's durable query failed.
    #[error("Durable store error: {0}")]
    Durable(#[source] BoxError),
}

/// Convenience type alias for cache results.
pub type Result<T> = std::result::Result<T, CacheError>;
