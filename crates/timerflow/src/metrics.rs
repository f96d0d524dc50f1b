use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub now_utc: DateTime<Utc>,
    pub timers: TimerCounts,
    pub tasks: TaskCounts,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TimerCounts {
    pub pending: i64,
    pub succeeded: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TaskCounts {
    pub queued: i64,
    pub running: i64,
    pub dead: i64,
}

#[derive(Clone)]
pub struct MetricsRepo {
    pool: PgPool,
}

impl MetricsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn snapshot(&self) -> Result<MetricsSnapshot, sqlx::Error> {
        let timers = sqlx::query_as::<_, TimerCounts>(
            r#"
            SELECT
              COUNT(*) FILTER (WHERE success IS NULL)  AS pending,
              COUNT(*) FILTER (WHERE success = TRUE)   AS succeeded,
              COUNT(*) FILTER (WHERE success = FALSE)  AS failed
            FROM timers
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let tasks = sqlx::query_as::<_, TaskCounts>(
            r#"
            SELECT
              COUNT(*) FILTER (WHERE status = 'queued')   AS queued,
              COUNT(*) FILTER (WHERE status = 'running')  AS running,
              COUNT(*) FILTER (WHERE status = 'dead')     AS dead
            FROM scheduled_tasks
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(MetricsSnapshot {
            now_utc: Utc::now(),
            timers,
            tasks,
        })
    }
}
