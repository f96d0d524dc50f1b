use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::scheduler::model::{NewTask, ScheduledTask};

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("scheduler persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("scheduler unavailable: {0}")]
    Unavailable(String),
}

/// Submission side of the deferred task scheduler.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Durably record that `task` must be dispatched no earlier than its
    /// `ready_at`. Submitting the same `(task_type, task_id)` twice is a
    /// no-op; returns `false` in that case.
    async fn schedule(&self, task: NewTask) -> Result<bool, ScheduleError>;
}

/// Worker side: leasing and completing due tasks.
///
/// Delivery is at-least-once. A lease that is not completed before it expires
/// is returned to the queue by [`TaskQueue::reap_expired_leases`].
#[async_trait]
pub trait TaskQueue: Scheduler {
    async fn lease_due(
        &self,
        worker_id: &str,
        lease_seconds: i64,
        limit: i64,
    ) -> Result<Vec<ScheduledTask>, ScheduleError>;

    async fn reap_expired_leases(&self) -> Result<u64, ScheduleError>;

    /// Returns `false` when the lease was lost to another worker.
    async fn mark_succeeded(&self, id: Uuid, worker_id: &str) -> Result<bool, ScheduleError>;

    async fn reschedule_for_retry(
        &self,
        id: Uuid,
        worker_id: &str,
        next_run_at: DateTime<Utc>,
        error_code: &str,
        error_message: &str,
    ) -> Result<bool, ScheduleError>;

    async fn mark_dead(
        &self,
        id: Uuid,
        worker_id: &str,
        reason_code: &str,
        error_code: &str,
        error_message: &str,
    ) -> Result<bool, ScheduleError>;
}
