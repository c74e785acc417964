use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::{SagaId, SagaLogError, StepStatus, TransactionStatus};

/// Persisted view of one saga step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One row in the saga log: a finished transaction and the state of each step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaLogRecord {
    pub saga_id: SagaId,
    pub steps: Vec<StepRecord>,
    pub final_status: TransactionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SagaLogRecord {
    /// Returns the names of steps that ended in the given status.
    pub fn steps_with_status(&self, status: StepStatus) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Durable log of finished saga transactions.
///
/// Writes are best-effort from the coordinator's point of view: a failed
/// `record` is logged and never changes a saga's outcome.
#[async_trait]
pub trait SagaLog: Send + Sync {
    /// Appends a transaction record.
    async fn record(&self, record: &SagaLogRecord) -> Result<()>;

    /// Loads a transaction record by saga ID.
    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaLogRecord>>;
}

/// In-memory saga log for testing.
#[derive(Clone, Default)]
pub struct InMemorySagaLog {
    records: Arc<RwLock<HashMap<SagaId, SagaLogRecord>>>,
    fail_on_record: Arc<AtomicBool>,
}

impl InMemorySagaLog {
    /// Creates a new empty saga log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the log to reject every write.
    pub fn set_fail_on_record(&self, fail: bool) {
        self.fail_on_record.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of stored records.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns every stored record, oldest first.
    pub async fn records(&self) -> Vec<SagaLogRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.finished_at);
        records
    }
}

#[async_trait]
impl SagaLog for InMemorySagaLog {
    async fn record(&self, record: &SagaLogRecord) -> Result<()> {
        if self.fail_on_record.load(Ordering::SeqCst) {
            return Err(SagaLogError::Database(sqlx::Error::PoolTimedOut));
        }
        self.records
            .write()
            .await
            .insert(record.saga_id, record.clone());
        Ok(())
    }

    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaLogRecord>> {
        Ok(self.records.read().await.get(&saga_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(saga_id: SagaId) -> SagaLogRecord {
        let now = Utc::now();
        SagaLogRecord {
            saga_id,
            steps: vec![
                StepRecord {
                    name: "volatile_write".to_string(),
                    status: StepStatus::Compensated,
                    error: None,
                    started_at: Some(now),
                    completed_at: Some(now),
                },
                StepRecord {
                    name: "durable_write".to_string(),
                    status: StepStatus::Failed,
                    error: Some("boom".to_string()),
                    started_at: Some(now),
                    completed_at: None,
                },
            ],
            final_status: TransactionStatus::Failed,
            started_at: now,
            finished_at: now,
        }
    }

    #[tokio::test]
    async fn test_record_and_get() {
        let log = InMemorySagaLog::new();
        let saga_id = SagaId::new();

        log.record(&sample_record(saga_id)).await.unwrap();

        let stored = log.get(saga_id).await.unwrap().unwrap();
        assert_eq!(stored.final_status, TransactionStatus::Failed);
        assert_eq!(stored.steps_with_status(StepStatus::Failed), vec!["durable_write"]);
        assert_eq!(log.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_fail_on_record() {
        let log = InMemorySagaLog::new();
        log.set_fail_on_record(true);

        let result = log.record(&sample_record(SagaId::new())).await;
        assert!(result.is_err());
        assert_eq!(log.record_count().await, 0);
    }

    #[test]
    fn test_step_records_serialize_with_upper_case_status() {
        let record = sample_record(SagaId::new());
        let json = serde_json::to_value(&record.steps).unwrap();
        assert_eq!(json[0]["status"], "COMPENSATED");
        assert_eq!(json[1]["error"], "boom");
    }
}
