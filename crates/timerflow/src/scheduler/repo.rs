// crates/timerflow/src/scheduler/repo.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::scheduler::model::{NewTask, ScheduledTask, TaskStatus};
use crate::scheduler::queue::{ScheduleError, Scheduler, TaskQueue};

#[derive(Clone)]
pub struct PgTaskQueue {
    pool: PgPool,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get_task(
        &self,
        task_type: &str,
        task_id: &str,
    ) -> Result<Option<ScheduledTask>, ScheduleError> {
        let task = sqlx::query_as::<_, ScheduledTask>(
            "SELECT * FROM scheduled_tasks WHERE task_type = $1 AND task_id = $2",
        )
        .bind(task_type)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    pub async fn list_by_status(
        &self,
        status: TaskStatus,
        limit: i64,
    ) -> Result<Vec<ScheduledTask>, ScheduleError> {
        let rows = sqlx::query_as::<_, ScheduledTask>(
            r#"
            SELECT *
            FROM scheduled_tasks
            WHERE status = $1
            ORDER BY run_at ASC, created_at ASC
            LIMIT $2
            "#,
        )
        .bind(status.as_str())
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl Scheduler for PgTaskQueue {
    async fn schedule(&self, task: NewTask) -> Result<bool, ScheduleError> {
        let res = sqlx::query(
            r#"
            INSERT INTO scheduled_tasks (task_type, task_id, payload_json, run_at, status, max_attempts)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (task_type, task_id) DO NOTHING
            "#,
        )
        .bind(&task.task_type)
        .bind(&task.task_id)
        .bind(&task.payload_json)
        .bind(task.ready_at)
        .bind(TaskStatus::Queued.as_str())
        .bind(task.max_attempts.max(1))
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    /// Lease up to `limit` due tasks for this worker.
    ///
    /// `run_at <= now()` is the no-earlier-than guarantee; SKIP LOCKED keeps
    /// two workers from claiming the same row.
    async fn lease_due(
        &self,
        worker_id: &str,
        lease_seconds: i64,
        limit: i64,
    ) -> Result<Vec<ScheduledTask>, ScheduleError> {
        let mut tx = self.pool.begin().await?;

        let leased = sqlx::query_as::<_, ScheduledTask>(
            r#"
            WITH candidates AS (
              SELECT id
              FROM scheduled_tasks
              WHERE status = 'queued'
                AND run_at <= now()
              ORDER BY run_at ASC, created_at ASC
              FOR UPDATE SKIP LOCKED
              LIMIT $3
            )
            UPDATE scheduled_tasks t
            SET status = 'running',
                locked_by = $1,
                locked_at = now(),
                lock_expires_at = now() + ($2::bigint * interval '1 second'),
                attempts = t.attempts + 1,
                updated_at = now()
            FROM candidates c
            WHERE t.id = c.id
            RETURNING t.*
            "#,
        )
        .bind(worker_id)
        .bind(lease_seconds.max(1))
        .bind(limit.clamp(1, 500))
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(leased)
    }

    async fn reap_expired_leases(&self) -> Result<u64, ScheduleError> {
        let res = sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET status = 'queued',
                locked_at = NULL,
                locked_by = NULL,
                lock_expires_at = NULL,
                updated_at = now()
            WHERE status = 'running'
              AND lock_expires_at IS NOT NULL
              AND lock_expires_at < now()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    // ----------------------------
    // State transitions
    // ----------------------------
    // The `locked_by = worker_id` guard stops a worker whose lease was reaped
    // from finishing a task another worker now owns.

    async fn mark_succeeded(&self, id: Uuid, worker_id: &str) -> Result<bool, ScheduleError> {
        let res = sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET status = 'succeeded',
                locked_at = NULL,
                locked_by = NULL,
                lock_expires_at = NULL,
                updated_at = now()
            WHERE id = $1
              AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn reschedule_for_retry(
        &self,
        id: Uuid,
        worker_id: &str,
        next_run_at: DateTime<Utc>,
        error_code: &str,
        error_message: &str,
    ) -> Result<bool, ScheduleError> {
        let res = sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET status = 'queued',
                run_at = $3,
                locked_at = NULL,
                locked_by = NULL,
                lock_expires_at = NULL,
                updated_at = now(),
                last_error_code = $4,
                last_error_message = $5
            WHERE id = $1
              AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(next_run_at)
        .bind(error_code)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn mark_dead(
        &self,
        id: Uuid,
        worker_id: &str,
        reason_code: &str,
        error_code: &str,
        error_message: &str,
    ) -> Result<bool, ScheduleError> {
        let res = sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET status = 'dead',
                dead_reason_code = $3,
                locked_at = NULL,
                locked_by = NULL,
                lock_expires_at = NULL,
                updated_at = now(),
                last_error_code = $4,
                last_error_message = $5
            WHERE id = $1
              AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(reason_code)
        .bind(error_code)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}
