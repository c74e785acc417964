//! Integration tests for the saga coordinator against real store capabilities.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use saga::{
    BoxError, SagaConfig, SagaCoordinator, SagaId, SagaOutcome, SagaStep, StepStatus,
    TransactionStatus,
};
use store::{InMemorySagaLog, InMemoryVolatileStore, SagaLog, VolatileStore, VolatileStoreExt};

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Stand-in for a durable table keyed by row ID.
type Table = Arc<Mutex<HashMap<String, String>>>;

struct TestHarness {
    coordinator: SagaCoordinator,
    log: InMemorySagaLog,
    cache: InMemoryVolatileStore,
    table: Table,
    compensations: Arc<Mutex<Vec<String>>>,
}

impl TestHarness {
    fn new() -> Self {
        init_tracing();
        let log = InMemorySagaLog::new();
        let coordinator = SagaCoordinator::new(SagaConfig {
            max_compensation_retries: 3,
            retry_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
        })
        .with_log(Arc::new(log.clone()));

        Self {
            coordinator,
            log,
            cache: InMemoryVolatileStore::new(),
            table: Arc::default(),
            compensations: Arc::default(),
        }
    }

    fn cache_step(&self, key: &str, value: &str) -> SagaStep {
        let (cache, comp_cache) = (self.cache.clone(), self.cache.clone());
        let (key, comp_key, value) = (key.to_string(), key.to_string(), value.to_string());
        let compensations = Arc::clone(&self.compensations);
        let name = format!("cache:{key}");
        let comp_name = name.clone();

        SagaStep::new(
            name,
            move || {
                let (cache, key, value) = (cache.clone(), key.clone(), value.clone());
                async move { cache.set_ex(&key, &value, Duration::from_secs(60)).await }
            },
            move || {
                let (cache, key) = (comp_cache.clone(), comp_key.clone());
                let compensations = Arc::clone(&compensations);
                let name = comp_name.clone();
                async move {
                    compensations.lock().unwrap().push(name);
                    cache.delete_one(&key).await.map(|_| ())
                }
            },
        )
    }

    fn row_step(&self, id: &str, value: &str, fail: bool) -> SagaStep {
        let (table, comp_table) = (Arc::clone(&self.table), Arc::clone(&self.table));
        let (id, comp_id, value) = (id.to_string(), id.to_string(), value.to_string());
        let compensations = Arc::clone(&self.compensations);
        let name = format!("row:{id}");
        let comp_name = name.clone();

        SagaStep::new(
            name,
            move || {
                let (table, id, value) = (Arc::clone(&table), id.clone(), value.clone());
                async move {
                    if fail {
                        return Err::<(), BoxError>("durable write rejected".into());
                    }
                    table.lock().unwrap().insert(id, value);
                    Ok(())
                }
            },
            move || {
                let (table, id) = (Arc::clone(&comp_table), comp_id.clone());
                let compensations = Arc::clone(&compensations);
                let name = comp_name.clone();
                async move {
                    compensations.lock().unwrap().push(name);
                    table.lock().unwrap().remove(&id);
                    Ok::<(), BoxError>(())
                }
            },
        )
    }
}

#[tokio::test]
async fn test_happy_path_applies_every_side_effect() {
    let h = TestHarness::new();
    let saga_id = h.coordinator.generate_saga_id();
    let mut steps = vec![
        h.cache_step("hot_cache:score:1", "95"),
        h.row_step("score:1", "95", false),
    ];

    assert!(h.coordinator.execute_saga(saga_id, &mut steps).await);

    assert_eq!(
        h.cache.get("hot_cache:score:1").await.unwrap().as_deref(),
        Some("95")
    );
    assert_eq!(
        h.table.lock().unwrap().get("score:1").map(String::as_str),
        Some("95")
    );
    assert!(h.compensations.lock().unwrap().is_empty());

    let record = h.log.get(saga_id).await.unwrap().unwrap();
    assert_eq!(record.final_status, TransactionStatus::Completed);
    assert_eq!(record.steps.len(), 2);
}

#[tokio::test]
async fn test_failure_restores_pre_transaction_state() {
    let h = TestHarness::new();
    let mut steps = vec![
        h.cache_step("hot_cache:score:1", "95"),
        h.row_step("score:1", "95", false),
        h.row_step("audit:1", "override", true),
        h.cache_step("hot_cache:never", "x"),
    ];

    let outcome = h.coordinator.run_saga(SagaId::new(), &mut steps).await;

    assert_eq!(
        outcome,
        SagaOutcome::Compensated {
            failed_step: "row:audit:1".to_string()
        }
    );
    assert!(h.cache.is_empty());
    assert!(h.table.lock().unwrap().is_empty());
    assert_eq!(
        *h.compensations.lock().unwrap(),
        vec!["row:score:1", "cache:hot_cache:score:1"]
    );
    assert_eq!(steps[3].status(), StepStatus::Pending);
    assert_eq!(h.cache.set_calls(), 1);
}

#[tokio::test]
async fn test_three_step_saga_with_failing_middle_step() {
    let h = TestHarness::new();
    let boom = SagaStep::without_compensation("boom", || async {
        Err::<(), BoxError>("boom".into())
    });
    let mut steps = vec![
        h.row_step("first", "1", false),
        boom,
        h.row_step("third", "3", false),
    ];

    let ok = h.coordinator.execute_saga(SagaId::new(), &mut steps).await;

    assert!(!ok);
    assert_eq!(steps[1].status(), StepStatus::Failed);
    assert_eq!(steps[1].error(), Some("boom"));
    assert_eq!(steps[0].status(), StepStatus::Compensated);
    assert_eq!(steps[2].status(), StepStatus::Pending);
    assert_eq!(*h.compensations.lock().unwrap(), vec!["row:first"]);
}

#[tokio::test]
async fn test_unreachable_cache_during_compensation_is_recorded() {
    let h = TestHarness::new();
    let saga_id = SagaId::new();
    let mut steps = vec![
        h.cache_step("hot_cache:score:2", "80"),
        h.row_step("score:2", "80", true),
    ];

    // The cache write lands, then the store drops before compensation.
    let cache = h.cache.clone();
    let mut first = vec![steps.remove(0)];
    assert!(h.coordinator.execute_saga(SagaId::new(), &mut first).await);
    cache.set_unavailable(true);
    steps.insert(0, first.remove(0));

    let compensated = h.coordinator.compensate(saga_id, &mut steps).await;

    assert!(!compensated);
    assert_eq!(steps[0].status(), StepStatus::CompensationFailed);
    assert_eq!(steps[0].compensation_attempts(), 3);
    assert_eq!(h.compensations.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_concurrent_sagas_do_not_interfere() {
    let h = Arc::new(TestHarness::new());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                let mut steps = vec![
                    h.cache_step(&format!("hot_cache:item:{i}"), "v"),
                    h.row_step(&format!("item:{i}"), "v", i % 2 == 1),
                ];
                h.coordinator.execute_saga(SagaId::new(), &mut steps).await
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert_eq!(results.iter().filter(|ok| **ok).count(), 4);
    assert_eq!(h.cache.len(), 4);
    assert_eq!(h.table.lock().unwrap().len(), 4);
    assert_eq!(h.log.record_count().await, 8);
    for i in (1..8).step_by(2) {
        assert!(!h.cache.contains_key(&format!("hot_cache:item:{i}")));
    }
}
