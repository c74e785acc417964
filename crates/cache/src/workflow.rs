//! Workflow state channel.
//!
//! Long-running workflows publish snapshots of their state under a
//! namespace separate from cached values, so observers can read the latest
//! snapshot or follow updates live. State sync is best effort: it never
//! fails the workflow that calls it.

use serde::Serialize;
use serde::de::DeserializeOwned;
use store::{VolatileError, VolatileStore};

use crate::service::MultiLayerCacheService;
use crate::subscription::SubscriptionHandle;

impl<V: VolatileStore + 'static> MultiLayerCacheService<V> {
    /// Stores `state` under the workflow key and publishes it on the
    /// workflow's update channel. Skipped in fallback mode.
    #[tracing::instrument(skip(self, state))]
    pub async fn sync_workflow_state<T: Serialize>(&self, workflow_id: &str, state: &T) {
        if workflow_id.is_empty() {
            tracing::warn!("ignoring workflow state without an ID");
            return;
        }
        if !self.try_exit_fallback_mode().await {
            tracing::debug!("fallback mode, skipping workflow state sync");
            return;
        }
        let payload = match serde_json::to_string(state) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "workflow state is not serializable");
                return;
            }
        };

        let key = self.config.workflow_key(workflow_id);
        let channel = self.config.workflow_channel(workflow_id);
        let result = async {
            self.store
                .set_ex(&key, &payload, self.config.workflow_ttl)
                .await?;
            self.store.publish(&channel, &payload).await
        }
        .await;

        match result {
            Ok(receivers) => {
                self.stats.record_notification_sent();
                tracing::debug!(receivers, "workflow state synced");
            }
            Err(e) => {
                tracing::warn!(error = %e, "workflow state sync failed");
                self.fallback.enter(&e.to_string()).await;
            }
        }
    }

    /// Returns the last synced state of a workflow.
    ///
    /// `None` if absent, expired, undecodable, or the service is in fallback
    /// mode.
    pub async fn get_workflow_state<T: DeserializeOwned>(&self, workflow_id: &str) -> Option<T> {
        if workflow_id.is_empty() || !self.try_exit_fallback_mode().await {
            return None;
        }

        let key = self.config.workflow_key(workflow_id);
        let raw = match self.store.get(&key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(%key, error = %e, "workflow state read failed");
                self.fallback.enter(&e.to_string()).await;
                return None;
            }
        };

        serde_json::from_str(&raw)
            .inspect_err(|e| tracing::warn!(%key, error = %e, "undecodable workflow state"))
            .ok()
    }

    /// Calls `callback` with every state update published for a workflow.
    ///
    /// Updates that do not decode as `T` are logged and skipped.
    pub async fn subscribe_workflow_state<T, F>(
        &self,
        workflow_id: &str,
        callback: F,
    ) -> Option<SubscriptionHandle>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        if workflow_id.is_empty() || !self.try_exit_fallback_mode().await {
            return None;
        }

        let channel = self.config.workflow_channel(workflow_id);
        let messages = match self.store.subscribe(&channel).await {
            Ok(messages) => messages,
            Err(e) => {
                self.subscription_failed(&channel, &e).await;
                return None;
            }
        };

        let stats = std::sync::Arc::clone(&self.stats);
        Some(SubscriptionHandle::spawn(channel, messages, move |message| {
            stats.record_notification_received();
            match serde_json::from_str::<T>(&message.payload) {
                Ok(state) => callback(state),
                Err(e) => {
                    tracing::warn!(channel = %message.channel, error = %e, "skipping undecodable workflow update")
                }
            }
        }))
    }

    async fn subscription_failed(&self, channel: &str, error: &VolatileError) {
        tracing::warn!(channel, error = %error, "failed to subscribe to workflow updates");
        self.fallback.enter(&error.to_string()).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde::{Deserialize, Serialize};
    use store::{InMemoryVolatileStore, VolatileStore};

    use crate::{CacheConfig, MultiLayerCacheService};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct BatchProgress {
        processed: u32,
        total: u32,
    }

    fn service(store: &InMemoryVolatileStore) -> MultiLayerCacheService<InMemoryVolatileStore> {
        MultiLayerCacheService::new(Arc::new(store.clone()), CacheConfig::default())
    }

    #[tokio::test]
    async fn test_sync_then_read_back() {
        let store = InMemoryVolatileStore::new();
        let cache = service(&store);
        let progress = BatchProgress { processed: 4, total: 10 };

        cache.sync_workflow_state("batch-1", &progress).await;

        assert!(store.contains_key("workflow_state:batch-1"));
        assert_eq!(store.publish_count("workflow_state_updates:batch-1"), 1);
        let loaded: Option<BatchProgress> = cache.get_workflow_state("batch-1").await;
        assert_eq!(loaded, Some(progress));
    }

    #[tokio::test]
    async fn test_missing_state_is_none() {
        let store = InMemoryVolatileStore::new();
        let cache = service(&store);

        let loaded: Option<BatchProgress> = cache.get_workflow_state("unknown").await;
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn test_subscriber_receives_updates() {
        let store = InMemoryVolatileStore::new();
        let cache = service(&store);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let handle = cache
            .subscribe_workflow_state("batch-2", move |state: BatchProgress| {
                let _ = tx.send(state);
            })
            .await
            .unwrap();

        store
            .publish("workflow_state_updates:batch-2", "garbage")
            .await
            .unwrap();
        cache
            .sync_workflow_state("batch-2", &BatchProgress { processed: 1, total: 2 })
            .await;

        let update = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update, BatchProgress { processed: 1, total: 2 });
        handle.cancel().await;
    }

    #[tokio::test]
    async fn test_sync_failure_enters_fallback_without_error() {
        let store = InMemoryVolatileStore::new();
        store.set_fail_on_publish(true);
        let cache = service(&store);

        cache
            .sync_workflow_state("batch-3", &BatchProgress { processed: 0, total: 1 })
            .await;

        assert!(cache.is_fallback_mode().await);
        let loaded: Option<BatchProgress> = cache.get_workflow_state("batch-3").await;
        assert_eq!(loaded, None);
    }
}
