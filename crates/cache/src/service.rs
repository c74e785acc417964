//! Multi-layer cache service.
//!
//! Reads try the volatile store first and fall back to a caller-supplied
//! durable query, backfilling the volatile store on a durable hit. Writes
//! go through a two-step saga (volatile write, then durable write) so a
//! failed durable write never leaves a stale volatile entry behind.
//! Invalidations delete matching keys and broadcast the pattern so other
//! processes can drop their own copies.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::BoxError;
use saga::{SagaCoordinator, SagaOutcome, SagaStep, StepSkipped};
use serde::Serialize;
use serde::de::DeserializeOwned;
use store::{VolatileError, VolatileStore, VolatileStoreExt};

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::fallback::{FallbackState, FallbackStatus};
use crate::stats::{CacheLayer, CacheStats, CacheStatsSnapshot};
use crate::subscription::SubscriptionHandle;

/// Step name of the volatile half of a write-through.
pub const STEP_VOLATILE_WRITE: &str = "volatile_write";
/// Step name of the durable half of a write-through.
pub const STEP_DURABLE_WRITE: &str = "durable_write";
/// Shortest TTL the volatile store can express (Redis `PSETEX` granularity).
pub const MIN_TTL: Duration = Duration::from_millis(1);

/// Two-layer cache in front of a durable store.
///
/// Clones share the same store handle, counters and fallback state.
pub struct MultiLayerCacheService<V: VolatileStore> {
    pub(crate) store: Arc<V>,
    pub(crate) coordinator: SagaCoordinator,
    pub(crate) config: CacheConfig,
    pub(crate) stats: Arc<CacheStats>,
    pub(crate) fallback: Arc<FallbackState>,
}

impl<V: VolatileStore> Clone for MultiLayerCacheService<V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            coordinator: self.coordinator.clone(),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
            fallback: Arc::clone(&self.fallback),
        }
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::Validation("cache key must not be empty".into()));
    }
    Ok(())
}

impl<V: VolatileStore + 'static> MultiLayerCacheService<V> {
    /// Creates a service with a default saga coordinator.
    pub fn new(store: Arc<V>, config: CacheConfig) -> Self {
        Self::with_coordinator(store, config, SagaCoordinator::default())
    }

    /// Creates a service whose write-throughs run on `coordinator`.
    pub fn with_coordinator(store: Arc<V>, config: CacheConfig, coordinator: SagaCoordinator) -> Self {
        let stats = Arc::new(CacheStats::new());
        let fallback = Arc::new(FallbackState::new(
            config.fallback_retry_interval,
            Arc::clone(&stats),
        ));
        Self {
            store,
            coordinator,
            config,
            stats,
            fallback,
        }
    }

    pub fn store(&self) -> &Arc<V> {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the volatile store key for `key`.
    pub fn namespaced_key(&self, key: &str) -> String {
        self.config.namespaced(key)
    }

    pub async fn is_fallback_mode(&self) -> bool {
        self.fallback.is_degraded().await
    }

    pub async fn fallback_status(&self) -> FallbackStatus {
        self.fallback.status().await
    }

    /// Stops using the volatile store until a later probe succeeds.
    pub async fn enter_fallback_mode(&self, reason: &str) {
        self.fallback.enter(reason).await;
    }

    /// Returns true if the volatile store may be used, probing it when the
    /// retry interval has elapsed in fallback mode.
    pub async fn try_exit_fallback_mode(&self) -> bool {
        self.fallback.try_exit(self.store.as_ref()).await
    }

    fn resolve_ttl(&self, ttl: Option<Duration>) -> Result<Duration> {
        match ttl {
            Some(ttl) if ttl < MIN_TTL => Err(CacheError::Validation(format!(
                "cache TTL must be at least {MIN_TTL:?}, got {ttl:?}"
            ))),
            Some(ttl) => Ok(ttl),
            None => Ok(self.config.default_ttl),
        }
    }

    async fn volatile_failed(&self, error: &VolatileError) {
        self.fallback.enter(&error.to_string()).await;
    }

    /// Reads `key`, trying the volatile store before `db_query`.
    ///
    /// A volatile miss or outage falls through to `db_query`; a durable hit
    /// is written back to the volatile store with `ttl` (or the default TTL)
    /// unless the service is in fallback mode. Only a failing `db_query`
    /// produces an error.
    #[tracing::instrument(skip(self, db_query, ttl))]
    pub async fn get_with_fallback<T, F, Fut, E>(
        &self,
        key: &str,
        db_query: F,
        ttl: Option<Duration>,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
        E: Into<BoxError>,
    {
        validate_key(key)?;
        let ttl = self.resolve_ttl(ttl)?;
        let namespaced = self.namespaced_key(key);
        let mut use_volatile = self.try_exit_fallback_mode().await;

        if use_volatile {
            match self.store.get(&namespaced).await {
                Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                    Ok(value) => {
                        self.stats.record_hit(CacheLayer::Volatile);
                        tracing::debug!("volatile hit");
                        return Ok(Some(value));
                    }
                    Err(e) => {
                        tracing::warn!(key = %namespaced, error = %e, "discarding undecodable cache entry");
                        self.stats.record_miss(CacheLayer::Volatile);
                    }
                },
                Ok(None) => self.stats.record_miss(CacheLayer::Volatile),
                Err(e) => {
                    tracing::warn!(key = %namespaced, error = %e, "volatile read failed");
                    self.volatile_failed(&e).await;
                    use_volatile = false;
                }
            }
        }

        let value = db_query()
            .await
            .map_err(|e| CacheError::Durable(e.into()))?;
        match value {
            Some(_) => self.stats.record_hit(CacheLayer::Durable),
            None => self.stats.record_miss(CacheLayer::Durable),
        }

        if use_volatile && let Some(found) = &value {
            self.backfill(&namespaced, found, ttl).await;
        }
        Ok(value)
    }

    async fn backfill<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(key, error = %e, "skipping backfill of unserializable value");
                return;
            }
        };
        match self.store.set_ex(key, &payload, ttl).await {
            Ok(()) => tracing::debug!(key, "backfilled volatile store"),
            Err(e) => {
                tracing::warn!(key, error = %e, "backfill failed");
                self.volatile_failed(&e).await;
            }
        }
    }

    /// Writes `value` to both layers as one saga.
    ///
    /// The volatile write runs first. If `db_write` then fails, the volatile
    /// entry is deleted again and `false` is returned. A volatile outage
    /// does not fail the write: the service enters fallback mode and the
    /// durable write proceeds alone.
    #[tracing::instrument(skip(self, value, db_write, ttl))]
    pub async fn write_through<T, F, Fut, R, E>(
        &self,
        key: &str,
        value: T,
        db_write: F,
        ttl: Option<Duration>,
    ) -> Result<bool>
    where
        T: Serialize + Clone + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Into<BoxError>,
    {
        validate_key(key)?;
        let ttl = self.resolve_ttl(ttl)?;
        let namespaced = self.namespaced_key(key);
        let payload = serde_json::to_string(&value)?;

        let mut steps = Vec::with_capacity(2);
        if self.try_exit_fallback_mode().await {
            steps.push(self.volatile_write_step(namespaced, payload, ttl));
        } else {
            tracing::debug!("fallback mode, writing durable store only");
        }
        steps.push(SagaStep::without_compensation(STEP_DURABLE_WRITE, move || {
            db_write(value.clone())
        }));

        let saga_id = self.coordinator.generate_saga_id();
        let outcome = self.coordinator.run_saga(saga_id, &mut steps).await;
        let success = outcome.is_completed();
        self.stats.record_write(success);

        match &outcome {
            SagaOutcome::Completed => tracing::debug!(%saga_id, "write-through completed"),
            SagaOutcome::CompensationIncomplete { unrecovered, .. } => tracing::error!(
                %saga_id,
                ?unrecovered,
                "write-through failed and a stale volatile entry may remain"
            ),
            other => tracing::warn!(%saga_id, failed_step = ?other.failed_step(), "write-through failed"),
        }
        Ok(success)
    }

    /// Builds the volatile half of a write-through.
    ///
    /// An outage enters fallback mode and reports the step as skipped, so
    /// the durable write still runs and the saga log shows that nothing was
    /// cached.
    fn volatile_write_step(&self, key: String, payload: String, ttl: Duration) -> SagaStep {
        let action = {
            let (store, fallback, key) = (
                Arc::clone(&self.store),
                Arc::clone(&self.fallback),
                key.clone(),
            );
            move || {
                let (store, fallback, key, payload) = (
                    Arc::clone(&store),
                    Arc::clone(&fallback),
                    key.clone(),
                    payload.clone(),
                );
                async move {
                    if let Err(e) = store.set_ex(&key, &payload, ttl).await {
                        tracing::warn!(key, error = %e, "volatile write failed, continuing with durable write");
                        fallback.enter(&e.to_string()).await;
                        return Err::<(), BoxError>(StepSkipped::new(e.to_string()).into());
                    }
                    Ok(())
                }
            }
        };

        let compensation = {
            let (store, fallback) = (Arc::clone(&self.store), Arc::clone(&self.fallback));
            move || {
                let (store, fallback, key) =
                    (Arc::clone(&store), Arc::clone(&fallback), key.clone());
                async move {
                    if let Err(e) = store.delete_one(&key).await {
                        fallback.enter(&e.to_string()).await;
                        return Err(e);
                    }
                    Ok(())
                }
            }
        };

        SagaStep::new(STEP_VOLATILE_WRITE, action, compensation)
    }

    /// Deletes every volatile key matching `pattern` and broadcasts the
    /// pattern on the invalidation channel.
    ///
    /// Exactly one notification is published per successful call, even when
    /// nothing matched. Returns the number of keys deleted; `0` in fallback
    /// mode or on failure. A broadcast that fails after the deletes is logged
    /// with the deleted count, since peers were never told.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_with_notification(&self, pattern: &str) -> u64 {
        if pattern.is_empty() {
            tracing::warn!("ignoring invalidation with an empty pattern");
            return 0;
        }
        if !self.try_exit_fallback_mode().await {
            tracing::debug!("fallback mode, skipping invalidation");
            return 0;
        }

        let deleted = match self.delete_matching(pattern).await {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::warn!(error = %e, "invalidation failed");
                self.volatile_failed(&e).await;
                return 0;
            }
        };

        if let Err(e) = self
            .store
            .publish(&self.config.invalidation_channel, pattern)
            .await
        {
            tracing::warn!(deleted, error = %e, "keys deleted but invalidation was not broadcast");
            self.volatile_failed(&e).await;
            return 0;
        }

        self.stats.record_notification_sent();
        tracing::info!(deleted, "cache invalidated");
        deleted
    }

    async fn delete_matching(&self, pattern: &str) -> std::result::Result<u64, VolatileError> {
        let batch = self.config.scan_batch_size.max(1);
        let keys = self
            .store
            .scan_all(&self.namespaced_key(pattern), batch)
            .await?;

        let mut deleted = 0;
        for chunk in keys.chunks(batch) {
            deleted += self.store.delete(chunk).await?;
        }
        Ok(deleted)
    }

    /// Deletes a single key and broadcasts it on the invalidation channel.
    ///
    /// Returns true if the key existed.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate(&self, key: &str) -> bool {
        if key.is_empty() || !self.try_exit_fallback_mode().await {
            return false;
        }

        let result = async {
            let existed = self.store.delete_one(&self.namespaced_key(key)).await?;
            self.store
                .publish(&self.config.invalidation_channel, key)
                .await?;
            Ok::<bool, VolatileError>(existed)
        }
        .await;

        match result {
            Ok(existed) => {
                self.stats.record_notification_sent();
                existed
            }
            Err(e) => {
                tracing::warn!(error = %e, "invalidation failed");
                self.volatile_failed(&e).await;
                false
            }
        }
    }

    /// Starts a background listener that passes every invalidated pattern
    /// to `handler`.
    ///
    /// Returns `None` in fallback mode or if the subscription fails.
    pub async fn listen_for_invalidations<F>(&self, handler: F) -> Option<SubscriptionHandle>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        if !self.try_exit_fallback_mode().await {
            tracing::debug!("fallback mode, not listening for invalidations");
            return None;
        }

        let channel = self.config.invalidation_channel.clone();
        match self.store.subscribe(&channel).await {
            Ok(messages) => {
                let stats = Arc::clone(&self.stats);
                tracing::info!(%channel, "listening for cache invalidations");
                Some(SubscriptionHandle::spawn(channel, messages, move |message| {
                    stats.record_notification_received();
                    tracing::debug!(pattern = %message.payload, "invalidation received");
                    handler(message.payload);
                }))
            }
            Err(e) => {
                tracing::warn!(%channel, error = %e, "failed to subscribe to invalidations");
                self.volatile_failed(&e).await;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saga::SagaConfig;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use store::InMemoryVolatileStore;

    fn service(store: &InMemoryVolatileStore) -> MultiLayerCacheService<InMemoryVolatileStore> {
        let coordinator = SagaCoordinator::new(SagaConfig {
            max_compensation_retries: 2,
            retry_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        });
        MultiLayerCacheService::with_coordinator(
            Arc::new(store.clone()),
            CacheConfig::default(),
            coordinator,
        )
    }

    async fn never_called() -> std::result::Result<Option<String>, BoxError> {
        panic!("durable store should not be queried")
    }

    #[tokio::test]
    async fn test_volatile_hit_skips_durable_query() {
        let store = InMemoryVolatileStore::new();
        store
            .set_ex("hot_cache:k", "\"cached\"", Duration::from_secs(60))
            .await
            .unwrap();
        let cache = service(&store);

        let value = cache.get_with_fallback("k", never_called, None).await.unwrap();

        assert_eq!(value.as_deref(), Some("cached"));
        assert_eq!(cache.stats().volatile_hits, 1);
    }

    #[tokio::test]
    async fn test_durable_miss_is_not_backfilled() {
        let store = InMemoryVolatileStore::new();
        let cache = service(&store);

        let value: Option<String> = cache
            .get_with_fallback("k", || async { Ok::<_, BoxError>(None) }, None)
            .await
            .unwrap();

        assert_eq!(value, None);
        assert!(store.is_empty());
        assert_eq!(cache.stats().durable_misses, 1);
    }

    #[tokio::test]
    async fn test_undecodable_entry_falls_through() {
        let store = InMemoryVolatileStore::new();
        store
            .set_ex("hot_cache:k", "not json", Duration::from_secs(60))
            .await
            .unwrap();
        let cache = service(&store);

        let value = cache
            .get_with_fallback("k", || async { Ok::<_, BoxError>(Some(7u32)) }, None)
            .await
            .unwrap();

        assert_eq!(value, Some(7));
        assert_eq!(store.get("hot_cache:k").await.unwrap().as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_durable_query_error_propagates() {
        let store = InMemoryVolatileStore::new();
        let cache = service(&store);

        let result: Result<Option<String>> = cache
            .get_with_fallback("k", || async { Err::<Option<String>, _>("db down") }, None)
            .await;

        assert!(matches!(result, Err(CacheError::Durable(_))));
    }

    #[tokio::test]
    async fn test_rejects_empty_key_and_zero_ttl() {
        let store = InMemoryVolatileStore::new();
        let cache = service(&store);

        let empty = cache.get_with_fallback("", never_called, None).await;
        assert!(matches!(empty, Err(CacheError::Validation(_))));

        let zero = cache
            .write_through("k", 1u32, |_| async { Ok::<(), BoxError>(()) }, Some(Duration::ZERO))
            .await;
        assert!(matches!(zero, Err(CacheError::Validation(_))));
        assert_eq!(store.set_calls(), 0);
    }

    #[tokio::test]
    async fn test_rejects_ttl_below_one_millisecond() {
        let store = InMemoryVolatileStore::new();
        let cache = service(&store);

        let write = cache
            .write_through(
                "k",
                1u32,
                |_| async { Ok::<(), BoxError>(()) },
                Some(Duration::from_micros(500)),
            )
            .await;
        assert!(matches!(write, Err(CacheError::Validation(_))));

        let read = cache
            .get_with_fallback("k", never_called, Some(Duration::from_nanos(999_999)))
            .await;
        assert!(matches!(read, Err(CacheError::Validation(_))));

        assert_eq!(store.set_calls(), 0);
        assert!(!cache.is_fallback_mode().await);

        let ok = cache
            .write_through("k", 1u32, |_| async { Ok::<(), BoxError>(()) }, Some(MIN_TTL))
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn test_write_through_failure_removes_volatile_entry() {
        let store = InMemoryVolatileStore::new();
        let cache = service(&store);
        let table: Arc<Mutex<HashMap<String, u32>>> = Arc::default();
        let rows = Arc::clone(&table);

        let ok = cache
            .write_through(
                "k",
                5u32,
                move |v| {
                    let rows = Arc::clone(&rows);
                    async move {
                        if v > 3 {
                            return Err::<(), BoxError>("check constraint violated".into());
                        }
                        rows.lock().unwrap().insert("k".into(), v);
                        Ok(())
                    }
                },
                None,
            )
            .await
            .unwrap();

        assert!(!ok);
        assert!(!store.contains_key("hot_cache:k"));
        assert!(table.lock().unwrap().is_empty());
        assert_eq!(cache.stats().write_failures, 1);
    }

    #[tokio::test]
    async fn test_write_through_survives_volatile_outage() {
        let store = InMemoryVolatileStore::new();
        store.set_fail_on_set(true);
        let cache = service(&store);

        let ok = cache
            .write_through("k", 1u32, |_| async { Ok::<(), BoxError>(()) }, None)
            .await
            .unwrap();

        assert!(ok);
        assert!(cache.is_fallback_mode().await);
        assert_eq!(cache.stats().fallback_activations, 1);
    }

    #[tokio::test]
    async fn test_unbroadcast_invalidation_still_deletes_and_degrades() {
        let store = InMemoryVolatileStore::new();
        store.set_fail_on_publish(true);
        let cache = service(&store);
        store
            .set_ex("hot_cache:sub:1", "1", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.invalidate_with_notification("sub:*").await, 0);

        assert!(!store.contains_key("hot_cache:sub:1"));
        assert!(cache.is_fallback_mode().await);
        assert_eq!(cache.stats().notifications_sent, 0);
    }

    #[tokio::test]
    async fn test_single_key_invalidate() {
        let store = InMemoryVolatileStore::new();
        let cache = service(&store);
        store
            .set_ex("hot_cache:k", "1", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(cache.invalidate("k").await);
        assert!(!cache.invalidate("k").await);
        assert_eq!(store.publish_count("cache_invalidation"), 2);
        assert!(!cache.invalidate("").await);
    }

    #[tokio::test]
    async fn test_listener_not_started_in_fallback_mode() {
        let store = InMemoryVolatileStore::new();
        let cache = service(&store);
        cache.enter_fallback_mode("maintenance").await;

        assert!(cache.listen_for_invalidations(|_| {}).await.is_none());
        assert_eq!(store.subscriber_count("cache_invalidation"), 0);
    }
}
