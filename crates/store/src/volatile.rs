use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;

use crate::VolatileError;

/// A message received on a publish/subscribe channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    /// The channel the message was published on.
    pub channel: String,
    /// The raw message payload.
    pub payload: String,
}

/// A stream of pub/sub messages for one subscription.
///
/// Dropping the stream unsubscribes and releases the underlying connection.
pub type MessageStream = Pin<Box<dyn Stream<Item = PubSubMessage> + Send>>;

/// Result type for volatile store operations.
pub type Result<T> = std::result::Result<T, VolatileError>;

/// Core trait for the fast, lossy key/value store.
///
/// Every method may fail independently of the durable store. Implementations
/// must report an unreachable store as [`VolatileError::Unavailable`].
#[async_trait]
pub trait VolatileStore: Send + Sync {
    /// Reads a value. Returns `None` if the key does not exist or has expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a value that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Deletes the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Incrementally iterates keys matching a glob `pattern`.
    ///
    /// Start with cursor `0`; iteration is complete when the returned cursor
    /// is `0` again. `count` is a batch-size hint.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;

    /// Publishes a message, returning the number of receivers.
    async fn publish(&self, channel: &str, message: &str) -> Result<u64>;

    /// Subscribes to a channel.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream>;

    /// Lightweight liveness probe.
    async fn ping(&self) -> Result<()>;
}

/// Extension trait providing convenience methods for volatile stores.
#[async_trait]
pub trait VolatileStoreExt: VolatileStore {
    /// Deletes a single key, returning true if it existed.
    async fn delete_one(&self, key: &str) -> Result<bool> {
        Ok(self.delete(&[key.to_string()]).await? > 0)
    }

    /// Collects every key matching `pattern` by driving [`VolatileStore::scan`]
    /// until the cursor wraps back to zero.
    async fn scan_all(&self, pattern: &str, count: usize) -> Result<Vec<String>> {
        let mut cursor = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch) = self.scan(cursor, pattern, count).await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

// Blanket implementation for all VolatileStore implementations
impl<T: VolatileStore + ?Sized> VolatileStoreExt for T {}
