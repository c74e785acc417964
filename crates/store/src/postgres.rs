use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::Result;
use crate::saga_log::{SagaLog, SagaLogRecord, StepRecord};
use crate::{SagaId, SagaLogError, TransactionStatus};

/// PostgreSQL-backed saga log.
#[derive(Clone)]
pub struct PostgresSagaLog {
    pool: PgPool,
}

impl PostgresSagaLog {
    /// Creates a new PostgreSQL saga log.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Returns the IDs of failed sagas that finished at or after `since`,
    /// newest first. Used to find transactions that may need manual repair.
    pub async fn failed_since(&self, since: DateTime<Utc>) -> Result<Vec<SagaId>> {
        let rows = sqlx::query(
            r#"
            SELECT saga_id FROM saga_transactions
            WHERE final_status = 'FAILED' AND finished_at >= $1
            ORDER BY finished_at DESC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<SagaId> {
                Ok(SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?))
            })
            .collect()
    }

    fn row_to_record(row: PgRow) -> Result<SagaLogRecord> {
        let saga_id = SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?);
        let steps_json: serde_json::Value = row.try_get("steps")?;
        let steps: Vec<StepRecord> = serde_json::from_value(steps_json)?;
        let status: String = row.try_get("final_status")?;
        let final_status =
            TransactionStatus::parse(&status).ok_or_else(|| SagaLogError::CorruptRecord {
                saga_id: saga_id.to_string(),
                reason: format!("unknown final status '{status}'"),
            })?;

        Ok(SagaLogRecord {
            saga_id,
            steps,
            final_status,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }
}

#[async_trait]
impl SagaLog for PostgresSagaLog {
    async fn record(&self, record: &SagaLogRecord) -> Result<()> {
        let steps_json = serde_json::to_value(&record.steps)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO saga_transactions (saga_id, steps, final_status, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (saga_id) DO UPDATE
            SET steps = EXCLUDED.steps,
                final_status = EXCLUDED.final_status,
                started_at = EXCLUDED.started_at,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(record.saga_id.as_uuid())
        .bind(steps_json)
        .bind(record.final_status.as_str())
        .bind(record.started_at)
        .bind(record.finished_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        metrics::counter!("saga_log_records_total", "final_status" => record.final_status.as_str())
            .increment(1);
        Ok(())
    }

    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaLogRecord>> {
        let row = sqlx::query(
            r#"
            SELECT saga_id, steps, final_status, started_at, finished_at
            FROM saga_transactions
            WHERE saga_id = $1
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }
}
