//! Postgres-backed task store implementation.
//!
//! Guarded mutations are single `UPDATE ... WHERE status IN (...)` statements,
//! so the state machine is enforced atomically at the database level — two
//! writers racing on the same record (e.g. a worker completing while a `stop`
//! lands) resolve to exactly one winner with no lost update.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `TaskStoreError` as follows:
//!
//! | SQLx Error | TaskStoreError | Scenario |
//! |------------|----------------|----------|
//! | Database (unique violation `23505`) | `AlreadyExists` | Duplicate insert of a task id |
//! | Io / Tls / PoolTimedOut / PoolClosed | `Unavailable` | Store unreachable; callers may retry |
//! | Anything else | `Storage` | Constraint violations, decode failures, bugs |
//!
//! ## Fresh Reads
//!
//! `get` acquires a pooled connection inside the call and releases it before
//! returning. No connection, statement handle, or cached row ever survives
//! across a caller's poll interval, so every poll observes the latest
//! committed row by construction.

use std::sync::Arc;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use loreforge_core::{
    EntityId, JobType, RelatedEntity, TaskId, TaskRecord, TaskStatus, WorkerId,
};

use crate::task_store::{ClaimOutcome, TaskStats, TaskStore, TaskStoreError};

/// Column list shared by every query that materializes a `TaskRecord`.
const TASK_COLUMNS: &str = "id, job_type, parameters, status, progress, message, result, error, \
     worker_id, retry_count, entity_id, entity_type, created_at, started_at, completed_at";

/// Task table DDL, applied by [`PostgresTaskStore::ensure_schema`].
const TASKS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id UUID PRIMARY KEY,
    job_type TEXT NOT NULL,
    parameters JSONB NOT NULL DEFAULT '{}'::jsonb,
    status TEXT NOT NULL,
    progress SMALLINT NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
    message TEXT,
    result JSONB,
    error TEXT,
    worker_id TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    entity_id UUID,
    entity_type TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS tasks_status_idx ON tasks (status, created_at DESC);
CREATE INDEX IF NOT EXISTS tasks_entity_idx ON tasks (entity_id, entity_type);
"#;

/// Postgres-backed task store.
///
/// ## Thread Safety
///
/// Uses the SQLx connection pool, which is thread-safe (`Arc + Send + Sync`);
/// the store is shared across the worker pool and all progress bridges.
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: Arc<PgPool>,
}

impl PostgresTaskStore {
    /// Create a new store over the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the tasks table and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), TaskStoreError> {
        sqlx::raw_sql(TASKS_SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Fetch the current status for conflict diagnostics after a guarded
    /// update matched no row.
    async fn current_status(&self, task_id: TaskId) -> Result<TaskStatus, TaskStoreError> {
        let row = sqlx::query("SELECT status FROM tasks WHERE id = $1")
            .bind(task_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_status", e))?
            .ok_or(TaskStoreError::NotFound(task_id))?;

        parse_status(row.try_get::<String, _>("status").map_err(decode_error)?)
    }

    /// Resolve a guarded update that matched no row into the caller-facing
    /// error: the record is either gone or in a status that rejects the write.
    async fn conflict_for(&self, task_id: TaskId) -> TaskStoreError {
        match self.current_status(task_id).await {
            Ok(status) => TaskStoreError::conflict(task_id, status),
            Err(err) => err,
        }
    }
}

#[async_trait::async_trait]
impl TaskStore for PostgresTaskStore {
    #[instrument(skip(self, record), fields(task_id = %record.id, job_type = %record.job_type), err)]
    async fn insert(&self, record: &TaskRecord) -> Result<(), TaskStoreError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, job_type, parameters, status, progress, message, result, error,
                worker_id, retry_count, entity_id, entity_type,
                created_at, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.job_type.as_str())
        .bind(&record.parameters)
        .bind(record.status.as_str())
        .bind(i16::from(record.progress))
        .bind(record.message.as_deref())
        .bind(record.result.as_ref())
        .bind(record.error.as_deref())
        .bind(record.worker_id.as_ref().map(|w| w.as_str()))
        .bind(record.retry_count as i32)
        .bind(record.related_entity.as_ref().map(|e| e.entity_id.as_uuid()))
        .bind(record.related_entity.as_ref().map(|e| e.entity_type.as_str()))
        .bind(record.created_at)
        .bind(record.started_at)
        .bind(record.completed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| match unique_violation(&e) {
            true => TaskStoreError::AlreadyExists(record.id),
            false => map_sqlx_error("insert", e),
        })?;

        Ok(())
    }

    async fn get(&self, task_id: TaskId) -> Result<TaskRecord, TaskStoreError> {
        // Scoped acquisition: the connection lives only for this one read and
        // is released before the caller's next poll tick.
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(task_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("get", e))?
            .ok_or(TaskStoreError::NotFound(task_id))?;

        row_to_record(&row)
    }

    #[instrument(skip(self), fields(task_id = %task_id, worker_id = %worker_id), err)]
    async fn claim(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
    ) -> Result<ClaimOutcome, TaskStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET status = 'processing', worker_id = $2, started_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task_id.as_uuid())
        .bind(worker_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim", e))?;

        match row {
            Some(row) => Ok(ClaimOutcome::Claimed(row_to_record(&row)?)),
            None => {
                // Not pending any more: stopped before claim, redelivery of a
                // finished task, or claimed by another worker.
                let status = self.current_status(task_id).await?;
                Ok(ClaimOutcome::Skipped(status))
            }
        }
    }

    async fn record_progress(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
        progress: u8,
        message: &str,
    ) -> Result<TaskStatus, TaskStoreError> {
        if progress > 100 {
            return Err(TaskStoreError::Domain(
                loreforge_core::TaskError::ProgressOutOfRange(progress),
            ));
        }

        // GREATEST keeps the write monotonic even if checkpoints land out of
        // order at the store.
        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET progress = GREATEST(progress, $3), message = $4
            WHERE id = $1 AND worker_id = $2 AND status = 'processing'
            RETURNING status
            "#,
        )
        .bind(task_id.as_uuid())
        .bind(worker_id.as_str())
        .bind(i16::from(progress))
        .bind(message)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_progress", e))?;

        match row {
            Some(row) => parse_status(row.try_get::<String, _>("status").map_err(decode_error)?),
            None => {
                let status = self.current_status(task_id).await?;
                if status.is_terminal() {
                    // A control operation finished the task; surface the
                    // status so the worker can abort at this checkpoint.
                    Ok(status)
                } else {
                    Err(TaskStoreError::conflict(task_id, status))
                }
            }
        }
    }

    #[instrument(skip(self, result), fields(task_id = %task_id), err)]
    async fn complete(
        &self,
        task_id: TaskId,
        result: serde_json::Value,
    ) -> Result<(), TaskStoreError> {
        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'completed', progress = 100, result = $2, completed_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(task_id.as_uuid())
        .bind(&result)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete", e))?;

        if done.rows_affected() == 0 {
            return Err(self.conflict_for(task_id).await);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %task_id), err)]
    async fn fail(&self, task_id: TaskId, error: &str) -> Result<(), TaskStoreError> {
        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed', error = $2, completed_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(task_id.as_uuid())
        .bind(error)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fail", e))?;

        if done.rows_affected() == 0 {
            return Err(self.conflict_for(task_id).await);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %task_id), err)]
    async fn stop(&self, task_id: TaskId) -> Result<TaskRecord, TaskStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET status = 'stopped', completed_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stop", e))?;

        match row {
            Some(row) => row_to_record(&row),
            None => Err(self.conflict_for(task_id).await),
        }
    }

    #[instrument(skip(self), fields(task_id = %task_id), err)]
    async fn reset_for_retry(&self, task_id: TaskId) -> Result<TaskRecord, TaskStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET status = 'pending', progress = 0, message = NULL, result = NULL,
                error = NULL, worker_id = NULL, started_at = NULL, completed_at = NULL,
                retry_count = retry_count + 1
            WHERE id = $1 AND status IN ('failed', 'stopped')
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reset_for_retry", e))?;

        match row {
            Some(row) => row_to_record(&row),
            None => Err(self.conflict_for(task_id).await),
        }
    }

    async fn list_by_status(
        &self,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, TaskStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_status", e))?;

        rows.iter().map(row_to_record).collect()
    }

    async fn list_by_entity(
        &self,
        entity_id: EntityId,
        entity_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, TaskStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE entity_id = $1 AND ($2::text IS NULL OR entity_type = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#
        ))
        .bind(entity_id.as_uuid())
        .bind(entity_type)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_entity", e))?;

        rows.iter().map(row_to_record).collect()
    }

    async fn stats(&self) -> Result<TaskStats, TaskStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM tasks GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = TaskStats::default();
        for row in rows {
            let status = parse_status(row.try_get::<String, _>("status").map_err(decode_error)?)?;
            let count: i64 = row.try_get("count").map_err(decode_error)?;
            stats.bump(status, count.max(0) as usize);
        }
        Ok(stats)
    }
}

fn row_to_record(row: &PgRow) -> Result<TaskRecord, TaskStoreError> {
    let job_type: String = row.try_get("job_type").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let progress: i16 = row.try_get("progress").map_err(decode_error)?;
    let retry_count: i32 = row.try_get("retry_count").map_err(decode_error)?;
    let worker_id: Option<String> = row.try_get("worker_id").map_err(decode_error)?;
    let entity_id: Option<uuid::Uuid> = row.try_get("entity_id").map_err(decode_error)?;
    let entity_type: Option<String> = row.try_get("entity_type").map_err(decode_error)?;

    let related_entity = match (entity_id, entity_type) {
        (Some(id), Some(ty)) => Some(RelatedEntity::new(EntityId::from_uuid(id), ty)),
        _ => None,
    };

    Ok(TaskRecord {
        id: TaskId::from_uuid(row.try_get("id").map_err(decode_error)?),
        job_type: JobType::from(job_type.as_str()),
        parameters: row.try_get("parameters").map_err(decode_error)?,
        status: parse_status(status)?,
        progress: progress.clamp(0, 100) as u8,
        message: row.try_get("message").map_err(decode_error)?,
        result: row.try_get("result").map_err(decode_error)?,
        error: row.try_get("error").map_err(decode_error)?,
        worker_id: worker_id.map(WorkerId::new),
        retry_count: retry_count.max(0) as u32,
        related_entity,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        started_at: row.try_get("started_at").map_err(decode_error)?,
        completed_at: row.try_get("completed_at").map_err(decode_error)?,
    })
}

fn parse_status(raw: String) -> Result<TaskStatus, TaskStoreError> {
    raw.parse::<TaskStatus>()
        .map_err(|e| TaskStoreError::Storage(e.to_string()))
}

fn decode_error(e: sqlx::Error) -> TaskStoreError {
    TaskStoreError::Storage(format!("row decode failed: {}", e))
}

fn unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn map_sqlx_error(operation: &str, e: sqlx::Error) -> TaskStoreError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => {
            TaskStoreError::Unavailable(format!("{}: {}", operation, e))
        }
        other => TaskStoreError::Storage(format!("{}: {}", operation, other)),
    }
}
