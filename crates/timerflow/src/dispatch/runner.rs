use chrono::Utc;
use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;

use crate::dispatch::registry::TaskError;
use crate::scheduler::{
    retry::{classify_error, next_delay_seconds, ErrorClass, RetryConfig},
    ScheduleError, ScheduledTask, TaskQueue,
};

/// What the runner did with a finished task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    Retrying { delay_secs: i64 },
    Dead,
    /// The lease was reaped before we finished; another worker owns the task now.
    LeaseLost,
}

#[derive(Clone)]
pub struct TaskRunner {
    queue: Arc<dyn TaskQueue>,
    retry_cfg: RetryConfig,
}

impl TaskRunner {
    pub fn new(queue: Arc<dyn TaskQueue>, retry_cfg: RetryConfig) -> Self {
        Self { queue, retry_cfg }
    }

    pub async fn on_success(
        &self,
        task: &ScheduledTask,
        worker_id: &str,
    ) -> Result<Completion, ScheduleError> {
        if self.queue.mark_succeeded(task.id, worker_id).await? {
            Ok(Completion::Succeeded)
        } else {
            Ok(Completion::LeaseLost)
        }
    }

    pub async fn on_failure(
        &self,
        task: &ScheduledTask,
        worker_id: &str,
        err: &TaskError,
    ) -> Result<Completion, ScheduleError> {
        let code = err.code.as_str();
        let class = classify_error(err.code);
        let can_retry = class == ErrorClass::Retryable && task.attempts < task.max_attempts;

        let (applied, completion) = if can_retry {
            // retry: exponential backoff + jitter + cap
            let mut rng = StdRng::from_entropy();
            let delay_secs = next_delay_seconds(task.attempts, &self.retry_cfg, &mut rng);
            let next_run_at = Utc::now() + chrono::Duration::seconds(delay_secs);

            let applied = self
                .queue
                .reschedule_for_retry(task.id, worker_id, next_run_at, code, &err.message)
                .await?;
            (applied, Completion::Retrying { delay_secs })
        } else {
            let reason_code = match class {
                ErrorClass::NonRetryable => "NON_RETRYABLE",
                ErrorClass::Retryable => "MAX_ATTEMPTS_EXCEEDED",
            };

            let applied = self
                .queue
                .mark_dead(task.id, worker_id, reason_code, code, &err.message)
                .await?;
            (applied, Completion::Dead)
        };

        Ok(if applied { completion } else { Completion::LeaseLost })
    }
}
