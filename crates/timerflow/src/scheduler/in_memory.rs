//! In-process task queue with the same leasing rules as the Postgres queue.
//! Nothing survives a restart; use it for tests and single-process demos.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::scheduler::model::{NewTask, ScheduledTask, TaskStatus};
use crate::scheduler::queue::{ScheduleError, Scheduler, TaskQueue};

#[derive(Clone, Default)]
pub struct InMemoryTaskQueue {
    tasks: Arc<Mutex<HashMap<Uuid, ScheduledTask>>>,
}

fn poisoned() -> ScheduleError {
    ScheduleError::Unavailable("lock poisoned".into())
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, task_type: &str, task_id: &str) -> Option<ScheduledTask> {
        let tasks = self.tasks.lock().ok()?;
        tasks
            .values()
            .find(|t| t.task_type == task_type && t.task_id == task_id)
            .cloned()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks
            .lock()
            .map(|tasks| {
                tasks
                    .values()
                    .filter(|t| t.status == status.as_str())
                    .count()
            })
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn expire_leases(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            let past = Utc::now() - Duration::seconds(1);
            for task in tasks.values_mut() {
                if task.lock_expires_at.is_some() {
                    task.lock_expires_at = Some(past);
                }
            }
        }
    }

    fn transition(
        &self,
        id: Uuid,
        worker_id: &str,
        apply: impl FnOnce(&mut ScheduledTask),
    ) -> Result<bool, ScheduleError> {
        let mut tasks = self.tasks.lock().map_err(|_| poisoned())?;
        match tasks.get_mut(&id) {
            Some(task) if task.locked_by.as_deref() == Some(worker_id) => {
                apply(task);
                release(task);
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn release(task: &mut ScheduledTask) {
    task.locked_at = None;
    task.locked_by = None;
    task.lock_expires_at = None;
}

#[async_trait]
impl Scheduler for InMemoryTaskQueue {
    async fn schedule(&self, task: NewTask) -> Result<bool, ScheduleError> {
        let mut tasks = self.tasks.lock().map_err(|_| poisoned())?;
        let exists = tasks
            .values()
            .any(|t| t.task_type == task.task_type && t.task_id == task.task_id);
        if exists {
            return Ok(false);
        }

        let now = Utc::now();
        let row = ScheduledTask {
            id: Uuid::new_v4(),
            task_type: task.task_type,
            task_id: task.task_id,
            payload_json: task.payload_json,
            run_at: task.ready_at,
            status: TaskStatus::Queued.as_str().to_string(),
            attempts: 0,
            max_attempts: task.max_attempts.max(1),
            locked_at: None,
            locked_by: None,
            lock_expires_at: None,
            last_error_code: None,
            last_error_message: None,
            dead_reason_code: None,
            created_at: now,
            updated_at: now,
        };
        tasks.insert(row.id, row);
        Ok(true)
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn lease_due(
        &self,
        worker_id: &str,
        lease_seconds: i64,
        limit: i64,
    ) -> Result<Vec<ScheduledTask>, ScheduleError> {
        let now = Utc::now();
        let mut tasks = self.tasks.lock().map_err(|_| poisoned())?;

        let mut due: Vec<&mut ScheduledTask> = tasks
            .values_mut()
            .filter(|t| t.status == TaskStatus::Queued.as_str() && t.run_at <= now)
            .collect();
        due.sort_by_key(|t| (t.run_at, t.created_at));

        let limit = usize::try_from(limit.clamp(1, 500)).unwrap_or(1);
        let expires = now + Duration::seconds(lease_seconds.max(1));

        Ok(due
            .into_iter()
            .take(limit)
            .map(|task| {
                task.status = TaskStatus::Running.as_str().to_string();
                task.locked_by = Some(worker_id.to_string());
                task.locked_at = Some(now);
                task.lock_expires_at = Some(expires);
                task.attempts += 1;
                task.updated_at = now;
                task.clone()
            })
            .collect())
    }

    async fn reap_expired_leases(&self) -> Result<u64, ScheduleError> {
        let now = Utc::now();
        let mut tasks = self.tasks.lock().map_err(|_| poisoned())?;
        let mut reaped = 0;
        for task in tasks.values_mut() {
            let expired = task.lock_expires_at.map(|at| at < now).unwrap_or(false);
            if task.status == TaskStatus::Running.as_str() && expired {
                task.status = TaskStatus::Queued.as_str().to_string();
                release(task);
                task.updated_at = now;
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    async fn mark_succeeded(&self, id: Uuid, worker_id: &str) -> Result<bool, ScheduleError> {
        self.transition(id, worker_id, |task| {
            task.status = TaskStatus::Succeeded.as_str().to_string();
        })
    }

    async fn reschedule_for_retry(
        &self,
        id: Uuid,
        worker_id: &str,
        next_run_at: DateTime<Utc>,
        error_code: &str,
        error_message: &str,
    ) -> Result<bool, ScheduleError> {
        self.transition(id, worker_id, |task| {
            task.status = TaskStatus::Queued.as_str().to_string();
            task.run_at = next_run_at;
            task.last_error_code = Some(error_code.to_string());
            task.last_error_message = Some(error_message.to_string());
        })
    }

    async fn mark_dead(
        &self,
        id: Uuid,
        worker_id: &str,
        reason_code: &str,
        error_code: &str,
        error_message: &str,
    ) -> Result<bool, ScheduleError> {
        self.transition(id, worker_id, |task| {
            task.status = TaskStatus::Dead.as_str().to_string();
            task.dead_reason_code = Some(reason_code.to_string());
            task.last_error_code = Some(error_code.to_string());
            task.last_error_message = Some(error_message.to_string());
        })
    }
}
