//! Store capabilities consumed by the saga coordinator and cache service.
//!
//! - [`VolatileStore`]: fast key/value store with publish/subscribe
//!   ([`RedisVolatileStore`], [`InMemoryVolatileStore`]).
//! - [`SagaLog`]: durable, best-effort log of finished saga transactions
//!   ([`PostgresSagaLog`], [`InMemorySagaLog`]).

pub mod error;
pub mod memory;
pub mod pattern;
pub mod postgres;
pub mod redis;
pub mod saga_log;
pub mod volatile;

pub use common::{SagaId, StepStatus, TransactionStatus};
pub use error::{SagaLogError, VolatileError};
pub use memory::InMemoryVolatileStore;
pub use postgres::PostgresSagaLog;
pub use redis::{RedisConfig, RedisVolatileStore};
pub use saga_log::{InMemorySagaLog, SagaLog, SagaLogRecord, StepRecord};
pub use volatile::{MessageStream, PubSubMessage, VolatileStore, VolatileStoreExt};
