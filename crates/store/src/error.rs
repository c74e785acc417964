use thiserror::Error;

/// Errors raised by a [`VolatileStore`](crate::VolatileStore).
///
/// A missing key is never an error; reads return `Ok(None)`.
#[derive(Debug, Error)]
pub enum VolatileError {
    /// The store could not be reached (connection refused, dropped, timed out,
    /// or the pool had no connection to hand out).
    #[error("Volatile store unavailable: {0}")]
    Unavailable(String),

    /// The store was reachable but rejected the command.
    #[error("Volatile store command failed: {0}")]
    Command(String),
}

impl VolatileError {
    /// Returns true if the error means the store is unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, VolatileError::Unavailable(_))
    }
}

impl From<redis::RedisError> for VolatileError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error()
            || e.is_connection_refusal()
            || e.is_connection_dropped()
            || e.is_timeout()
        {
            VolatileError::Unavailable(e.to_string())
        } else {
            VolatileError::Command(e.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for VolatileError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        VolatileError::Unavailable(e.to_string())
    }
}

/// Errors raised by a [`SagaLog`](crate::SagaLog).
#[derive(Debug, Error)]
pub enum SagaLogError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted row could not be mapped back to a record.
    #[error("Corrupt saga log row for {saga_id}: {reason}")]
    CorruptRecord { saga_id: String, reason: String },
}

/// Result type for saga log operations.
pub type Result<T> = std::result::Result<T, SagaLogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_is_distinguishable_from_command_errors() {
        assert!(VolatileError::Unavailable("refused".into()).is_unavailable());
        assert!(!VolatileError::Command("WRONGTYPE".into()).is_unavailable());
    }

    #[test]
    fn redis_io_errors_map_to_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: VolatileError = redis::RedisError::from(io).into();
        assert!(err.is_unavailable());
    }

    #[test]
    fn redis_response_errors_map_to_command() {
        let resp = redis::RedisError::from((redis::ErrorKind::TypeError, "WRONGTYPE"));
        let err: VolatileError = resp.into();
        assert!(matches!(err, VolatileError::Command(_)));
    }
}
