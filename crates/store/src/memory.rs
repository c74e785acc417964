use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::broadcast;

use crate::pattern::glob_match;
use crate::volatile::{MessageStream, PubSubMessage, Result, VolatileStore};
use crate::VolatileError;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct FailPoints {
    unavailable: bool,
    get: bool,
    set: bool,
    delete: bool,
    publish: bool,
}

#[derive(Debug, Default)]
struct InMemoryState {
    entries: HashMap<String, Entry>,
    channels: HashMap<String, broadcast::Sender<PubSubMessage>>,
    published: Vec<PubSubMessage>,
    fail: FailPoints,
    get_calls: usize,
    set_calls: usize,
    ping_calls: usize,
}

/// In-memory volatile store for testing and single-process development.
///
/// Behaves like the Redis implementation (TTL expiry, glob `scan`, pub/sub
/// fan-out) and adds failure injection plus call inspection so callers can
/// exercise outage handling without a real server.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVolatileStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryVolatileStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes every operation, including `ping`, fail as unavailable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().fail.unavailable = unavailable;
    }

    /// Makes `get` fail as unavailable.
    pub fn set_fail_on_get(&self, fail: bool) {
        self.state().fail.get = fail;
    }

    /// Makes `set_ex` fail as unavailable.
    pub fn set_fail_on_set(&self, fail: bool) {
        self.state().fail.set = fail;
    }

    /// Makes `delete` fail as unavailable.
    pub fn set_fail_on_delete(&self, fail: bool) {
        self.state().fail.delete = fail;
    }

    /// Makes `publish` fail as unavailable.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state().fail.publish = fail;
    }

    /// Returns every message published so far, in order.
    pub fn published(&self) -> Vec<PubSubMessage> {
        self.state().published.clone()
    }

    /// Returns the number of messages published on `channel`.
    pub fn publish_count(&self, channel: &str) -> usize {
        self.state()
            .published
            .iter()
            .filter(|m| m.channel == channel)
            .count()
    }

    /// Returns the number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state()
            .channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Returns how many times `get` was called.
    pub fn get_calls(&self) -> usize {
        self.state().get_calls
    }

    /// Returns how many times `set_ex` was called.
    pub fn set_calls(&self) -> usize {
        self.state().set_calls
    }

    /// Returns how many times `ping` was called.
    pub fn ping_calls(&self) -> usize {
        self.state().ping_calls
    }

    /// Returns true if a live (unexpired) entry exists for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.state()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired())
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.state()
            .entries
            .values()
            .filter(|e| !e.is_expired())
            .count()
    }

    /// Returns true if the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(fail: bool, op: &str) -> Result<()> {
        if fail {
            Err(VolatileError::Unavailable(format!(
                "in-memory store configured to fail on {op}"
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VolatileStore for InMemoryVolatileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state();
        state.get_calls += 1;
        Self::check(state.fail.unavailable || state.fail.get, "get")?;

        let value = state
            .entries
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.value.clone());
        if value.is_none() {
            state.entries.remove(key);
        }
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut state = self.state();
        state.set_calls += 1;
        Self::check(state.fail.unavailable || state.fail.set, "set")?;

        if ttl.as_millis() == 0 {
            return Err(VolatileError::Command(
                "invalid expire time in 'setex' command".to_string(),
            ));
        }

        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut state = self.state();
        Self::check(state.fail.unavailable || state.fail.delete, "delete")?;

        let mut removed = 0;
        for key in keys {
            if let Some(entry) = state.entries.remove(key)
                && !entry.is_expired()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let mut state = self.state();
        Self::check(state.fail.unavailable, "scan")?;

        state.entries.retain(|_, e| !e.is_expired());
        let mut keys: Vec<&String> = state.entries.keys().collect();
        keys.sort();

        let start = cursor as usize;
        let end = (start + count.max(1)).min(keys.len());
        let matched = keys
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .filter(|k| glob_match(pattern, k))
            .map(|k| k.to_string())
            .collect();
        let next = if end >= keys.len() { 0 } else { end as u64 };

        Ok((next, matched))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<u64> {
        let mut state = self.state();
        Self::check(state.fail.unavailable || state.fail.publish, "publish")?;

        let msg = PubSubMessage {
            channel: channel.to_string(),
            payload: message.to_string(),
        };
        state.published.push(msg.clone());

        let receivers = match state.channels.get(channel) {
            Some(tx) => tx.send(msg).unwrap_or(0),
            None => 0,
        };
        Ok(receivers as u64)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let mut state = self.state();
        Self::check(state.fail.unavailable, "subscribe")?;

        let rx = state
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let messages = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => return Some((msg, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "in-memory subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(messages))
    }

    async fn ping(&self) -> Result<()> {
        let mut state = self.state();
        state.ping_calls += 1;
        Self::check(state.fail.unavailable, "ping")
    }
}
