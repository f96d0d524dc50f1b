// crates/timerflow/src/maintenance.rs
//
// Periodic housekeeping: prunes finished task rows and schedules timers that
// were stored but never made it onto the task queue.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::time::Duration as StdDuration;

use crate::executor::FIRE_WEBHOOK;
use crate::scheduler::TaskStatus;

#[derive(Clone, Debug)]
pub struct MaintenanceConfig {
    pub interval: StdDuration,
    pub prune_after_days: i64,
    pub orphan_grace: Duration,
    pub batch_size: i64,
    pub max_attempts: i32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: StdDuration::from_secs(60),
            prune_after_days: 7,
            orphan_grace: Duration::seconds(60),
            batch_size: 500,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub orphans_scheduled: u64,
    pub tasks_pruned: u64,
}

#[derive(Clone)]
pub struct MaintenanceRepo {
    pool: PgPool,
}

impl MaintenanceRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete succeeded task rows last touched before `cutoff`. Dead rows are
    /// kept so the orphan sweep does not pick their timers up again.
    pub async fn prune_succeeded_tasks_older_than(
        &self,
        cutoff: DateTime<Utc>,
        batch: i64,
    ) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<uuid::Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM scheduled_tasks
            WHERE status = $1
              AND updated_at < $2
            ORDER BY updated_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT $3
            "#,
        )
        .bind(TaskStatus::Succeeded.as_str())
        .bind(cutoff)
        .bind(batch)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let deleted = sqlx::query("DELETE FROM scheduled_tasks WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted)
    }

    /// Schedule a `fire_webhook` task for every pending timer created before
    /// `created_before` that has no task row. Returns the number scheduled.
    pub async fn schedule_orphan_timers(
        &self,
        created_before: DateTime<Utc>,
        max_attempts: i32,
        batch: i64,
    ) -> Result<u64, sqlx::Error> {
        let scheduled = sqlx::query(
            r#"
            INSERT INTO scheduled_tasks (task_type, task_id, payload_json, run_at, status, max_attempts)
            SELECT $1, t.id, jsonb_build_object('timer_id', t.id, 'url', t.url), t.eta, $2, $3
            FROM timers t
            WHERE t.success IS NULL
              AND t.created < $4
              AND NOT EXISTS (
                SELECT 1
                FROM scheduled_tasks s
                WHERE s.task_type = $1
                  AND s.task_id = t.id
              )
            ORDER BY t.eta ASC
            LIMIT $5
            ON CONFLICT (task_type, task_id) DO NOTHING
            "#,
        )
        .bind(FIRE_WEBHOOK)
        .bind(TaskStatus::Queued.as_str())
        .bind(max_attempts.max(1))
        .bind(created_before)
        .bind(batch)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(scheduled)
    }

    pub async fn sweep(&self, cfg: &MaintenanceConfig) -> Result<SweepReport, sqlx::Error> {
        let orphans_scheduled = self
            .schedule_orphan_timers(Utc::now() - cfg.orphan_grace, cfg.max_attempts, cfg.batch_size)
            .await?;
        let tasks_pruned = self
            .prune_succeeded_tasks_older_than(cutoff_days(cfg.prune_after_days), cfg.batch_size)
            .await?;

        Ok(SweepReport {
            orphans_scheduled,
            tasks_pruned,
        })
    }

    /// Sweep on `cfg.interval` forever. Errors are logged and the loop keeps
    /// going.
    pub async fn run(&self, cfg: MaintenanceConfig) {
        let mut ticker = tokio::time::interval(cfg.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.sweep(&cfg).await {
                Ok(report) if report != SweepReport::default() => {
                    tracing::info!(
                        orphans_scheduled = report.orphans_scheduled,
                        tasks_pruned = report.tasks_pruned,
                        "maintenance sweep"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "maintenance sweep failed"),
            }
        }
    }
}

/// Cutoff `days` before now.
pub fn cutoff_days(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}
