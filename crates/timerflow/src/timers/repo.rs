// crates/timerflow/src/timers/repo.rs

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::store::{Store, StoreError};
use crate::timers::model::{NewTimer, TimerId, TimerOutcome, TimerRecord};

#[derive(Clone)]
pub struct PgTimerStore {
    pool: PgPool,
}

impl PgTimerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Timers that have not fired yet, oldest eta first.
    pub async fn list_pending(&self, limit: i64) -> Result<Vec<TimerRecord>, StoreError> {
        let rows = sqlx::query_as::<_, TimerRecord>(
            r#"
            SELECT *
            FROM timers
            WHERE success IS NULL
            ORDER BY eta ASC
            LIMIT $1
            "#,
        )
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl Store<TimerRecord> for PgTimerStore {
    async fn create(&self, new: NewTimer) -> Result<TimerRecord, StoreError> {
        let rec = sqlx::query_as::<_, TimerRecord>(
            r#"
            INSERT INTO timers (id, eta, url, user_id, created, updated)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING *
            "#,
        )
        .bind(TimerId::new())
        .bind(new.eta)
        .bind(new.url)
        .bind(new.owner)
        .bind(new.requested_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(rec)
    }

    async fn get(&self, id: TimerId) -> Result<TimerRecord, StoreError> {
        sqlx::query_as::<_, TimerRecord>("SELECT * FROM timers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found::<TimerRecord>(id))
    }

    /// Single `UPDATE ... RETURNING`: no read-then-write window.
    /// `GREATEST` keeps `updated` monotonic even if the database clock steps back.
    async fn update(
        &self,
        id: TimerId,
        outcome: TimerOutcome,
        owner: Option<Uuid>,
    ) -> Result<TimerRecord, StoreError> {
        sqlx::query_as::<_, TimerRecord>(
            r#"
            UPDATE timers
            SET status_code = $2,
                success = $3,
                response = $4,
                user_id = COALESCE($5, user_id),
                updated = GREATEST(now(), updated)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(outcome.status_code)
        .bind(outcome.success)
        .bind(outcome.response)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found::<TimerRecord>(id))
    }
}
