use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinSet};

use crate::dispatch::registry::{HandlerRegistry, TaskContext, TaskError};
use crate::dispatch::runner::{Completion, TaskRunner};
use crate::scheduler::{ErrorCode, ScheduleError, ScheduledTask, TaskQueue};

/// Ceiling for the pause after a failed reap or lease.
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub worker_id: String,
    pub lease_seconds: i64,
    pub batch_size: i64,
    /// Leased tasks allowed to run at once. Leasing pauses at the cap.
    pub max_in_flight: usize,
    pub poll_interval: Duration,
    pub reap_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-1".to_string(),
            lease_seconds: 30,
            batch_size: 16,
            max_in_flight: 64,
            poll_interval: Duration::from_millis(250),
            reap_interval: Duration::from_secs(1),
        }
    }
}

type Finished = (ScheduledTask, Result<(), TaskError>, Duration);

/// Leases due tasks and runs their registered handlers.
///
/// Handlers run in a [`JoinSet`] the poll loop never blocks on, so a slow
/// webhook holds one in-flight slot and nothing else: reaping and leasing
/// carry on around it.
pub struct Dispatcher {
    queue: Arc<dyn TaskQueue>,
    registry: Arc<HandlerRegistry>,
    runner: TaskRunner,
    cfg: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        registry: Arc<HandlerRegistry>,
        runner: TaskRunner,
        cfg: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            runner,
            cfg,
        }
    }

    /// Poll forever. Queue errors are logged and retried with backoff.
    pub async fn run(&self) {
        tracing::info!(
            worker_id = %self.cfg.worker_id,
            task_types = ?self.registry.task_types(),
            lease_seconds = self.cfg.lease_seconds,
            batch_size = self.cfg.batch_size,
            max_in_flight = self.cfg.max_in_flight,
            "dispatcher started"
        );

        let mut in_flight: JoinSet<Finished> = JoinSet::new();
        let mut last_reap_at: Option<Instant> = None;
        let mut error_backoff = self.cfg.poll_interval;

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                self.finish(joined).await;
            }

            let mut failed = false;

            // reclaim tasks from dead workers on a fixed interval, not every poll
            let reap_due = last_reap_at
                .map(|at| at.elapsed() >= self.cfg.reap_interval)
                .unwrap_or(true);
            if reap_due {
                last_reap_at = Some(Instant::now());
                match self.queue.reap_expired_leases().await {
                    Ok(0) => {}
                    Ok(reaped) => {
                        tracing::warn!(worker_id = %self.cfg.worker_id, reaped, "reaped expired leases")
                    }
                    Err(e) => {
                        tracing::warn!(worker_id = %self.cfg.worker_id, error = %e, "reap failed");
                        failed = true;
                    }
                }
            }

            let leased = match self.lease_into(&mut in_flight).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(worker_id = %self.cfg.worker_id, error = %e, "lease failed");
                    failed = true;
                    0
                }
            };

            if failed {
                tracing::debug!(backoff_ms = error_backoff.as_millis() as u64, "dispatcher backing off");
                self.wait(&mut in_flight, error_backoff).await;
                error_backoff = (error_backoff * 2).min(MAX_ERROR_BACKOFF);
                continue;
            }
            error_backoff = self.cfg.poll_interval;

            if leased == 0 || in_flight.len() >= self.cfg.max_in_flight {
                self.wait(&mut in_flight, self.cfg.poll_interval).await;
            }
        }
    }

    /// Lease one batch and wait for every task in it. Returns the number of
    /// tasks leased. The long-running loop is [`Dispatcher::run`].
    pub async fn run_once(&self) -> Result<usize, ScheduleError> {
        let mut batch = JoinSet::new();
        let leased = self.lease_into(&mut batch).await?;
        while let Some(joined) = batch.join_next().await {
            self.finish(joined).await;
        }
        Ok(leased)
    }

    /// Lease up to the free in-flight capacity and spawn a handler per task.
    async fn lease_into(&self, in_flight: &mut JoinSet<Finished>) -> Result<usize, ScheduleError> {
        let free = self.cfg.max_in_flight.saturating_sub(in_flight.len());
        let limit = self.cfg.batch_size.min(free as i64);
        if limit <= 0 {
            return Ok(0);
        }

        let batch = self
            .queue
            .lease_due(&self.cfg.worker_id, self.cfg.lease_seconds, limit)
            .await?;
        let leased = batch.len();

        for task in batch {
            let registry = self.registry.clone();
            let ctx = TaskContext::new(self.cfg.worker_id.clone(), &task);

            in_flight.spawn(async move {
                let start = Instant::now();
                tracing::debug!(
                    task_id = %task.task_id,
                    task_type = %task.task_type,
                    attempt = task.attempts,
                    "dispatching task"
                );

                let result: Result<(), TaskError> = match registry.handler_for(&task.task_type) {
                    Some(entry) => entry.run(&task, &ctx).await,
                    None => Err(TaskError::new(
                        ErrorCode::UnknownTaskType,
                        format!("no handler for task_type={}", task.task_type),
                    )),
                };

                (task, result, start.elapsed())
            });
        }

        Ok(leased)
    }

    /// Sleep for `pause`, waking early to record a finished task.
    async fn wait(&self, in_flight: &mut JoinSet<Finished>, pause: Duration) {
        if in_flight.is_empty() {
            tokio::time::sleep(pause).await;
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            Some(joined) = in_flight.join_next() => self.finish(joined).await,
        }
    }

    async fn finish(&self, joined: Result<Finished, JoinError>) {
        let (task, result, elapsed) = match joined {
            Ok(done) => done,
            Err(e) => {
                // lease expiry hands the task to another worker
                tracing::error!(error = %e, "task panicked; leaving it for the reaper");
                return;
            }
        };

        if let Err(e) = self.complete(&task, result, elapsed).await {
            tracing::error!(
                task_id = %task.task_id,
                task_type = %task.task_type,
                error = %e,
                "could not record completion; task returns after its lease expires"
            );
        }
    }

    async fn complete(
        &self,
        task: &ScheduledTask,
        result: Result<(), TaskError>,
        elapsed: Duration,
    ) -> Result<(), ScheduleError> {
        let worker_id = &self.cfg.worker_id;
        let latency_ms = elapsed.as_millis() as u64;

        let completion = match &result {
            Ok(()) => self.runner.on_success(task, worker_id).await?,
            Err(err) => self.runner.on_failure(task, worker_id, err).await?,
        };

        match (completion, &result) {
            (Completion::Succeeded, _) => tracing::info!(
                task_id = %task.task_id,
                task_type = %task.task_type,
                attempt = task.attempts,
                latency_ms,
                "task succeeded"
            ),
            (Completion::Retrying { delay_secs }, Err(err)) => tracing::warn!(
                task_id = %task.task_id,
                task_type = %task.task_type,
                attempt = task.attempts,
                code = err.code.as_str(),
                error = %err.message,
                delay_secs,
                "task failed, retry scheduled"
            ),
            (Completion::Dead, Err(err)) => tracing::error!(
                task_id = %task.task_id,
                task_type = %task.task_type,
                attempt = task.attempts,
                code = err.code.as_str(),
                error = %err.message,
                "task failed permanently"
            ),
            (Completion::LeaseLost, _) => tracing::warn!(
                task_id = %task.task_id,
                task_type = %task.task_type,
                "lease lost before completion; another worker owns the task"
            ),
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::registry::{boxed, HandlerOptions};
    use crate::scheduler::retry::RetryConfig;
    use crate::scheduler::{InMemoryTaskQueue, NewTask, Scheduler, TaskStatus};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn dispatcher(queue: &InMemoryTaskQueue, registry: HandlerRegistry) -> Dispatcher {
        let queue: Arc<dyn TaskQueue> = Arc::new(queue.clone());
        Dispatcher::new(
            queue.clone(),
            Arc::new(registry),
            TaskRunner::new(queue, RetryConfig::default()),
            DispatcherConfig::default(),
        )
    }

    async fn schedule(queue: &InMemoryTaskQueue, task_type: &str, delay_secs: i64) -> String {
        schedule_in(queue, task_type, chrono::Duration::seconds(delay_secs)).await
    }

    async fn schedule_in(queue: &InMemoryTaskQueue, task_type: &str, delay: chrono::Duration) -> String {
        let task_id = Uuid::new_v4().to_string();
        queue
            .schedule(NewTask {
                task_type: task_type.into(),
                task_id: task_id.clone(),
                payload_json: json!({}),
                ready_at: Utc::now() + delay,
                max_attempts: 3,
            })
            .await
            .unwrap();
        task_id
    }

    fn fast_config() -> DispatcherConfig {
        DispatcherConfig {
            poll_interval: Duration::from_millis(20),
            reap_interval: Duration::from_millis(50),
            ..DispatcherConfig::default()
        }
    }

    async fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        done()
    }

    #[tokio::test]
    async fn runs_due_tasks_and_leaves_future_ones() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        let counter = calls.clone();
        registry.register_with_options(
            "count",
            move |_task, _ctx| {
                let counter = counter.clone();
                boxed(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            },
            HandlerOptions::new().max_concurrency(2),
        );

        let queue = InMemoryTaskQueue::new();
        schedule(&queue, "count", 0).await;
        schedule(&queue, "count", -10).await;
        schedule(&queue, "count", 3600).await;

        let d = dispatcher(&queue, registry);
        assert_eq!(d.run_once().await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(queue.count(TaskStatus::Succeeded), 2);
        assert_eq!(queue.count(TaskStatus::Queued), 1);

        assert_eq!(d.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_task_type_goes_dead() {
        let queue = InMemoryTaskQueue::new();
        let task_id = schedule(&queue, "nobody_handles_this", 0).await;

        let d = dispatcher(&queue, HandlerRegistry::new());
        assert_eq!(d.run_once().await.unwrap(), 1);

        let row = queue.find("nobody_handles_this", &task_id).unwrap();
        assert_eq!(row.status, "dead");
        assert_eq!(row.last_error_code.as_deref(), Some("UNKNOWN_TASK_TYPE"));
    }

    #[tokio::test]
    async fn failing_handler_is_retried_later() {
        let mut registry = HandlerRegistry::new();
        registry.register("flaky", |_task, _ctx| {
            boxed(async move { Err(TaskError::new(ErrorCode::Persistence, "store down")) })
        });

        let queue = InMemoryTaskQueue::new();
        let task_id = schedule(&queue, "flaky", 0).await;

        let d = dispatcher(&queue, registry);
        assert_eq!(d.run_once().await.unwrap(), 1);

        let row = queue.find("flaky", &task_id).unwrap();
        assert_eq!(row.status, "queued");
        assert!(row.run_at > Utc::now());
        assert_eq!(row.attempts, 1);
    }

    #[tokio::test]
    async fn slow_handler_does_not_hold_back_later_timers() {
        let fast_calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register("slow", |_task, _ctx| {
            boxed(async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok(())
            })
        });
        let counter = fast_calls.clone();
        registry.register("fast", move |_task, _ctx| {
            let counter = counter.clone();
            boxed(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        let queue = InMemoryTaskQueue::new();
        let slow_id = schedule(&queue, "slow", 0).await;
        let fast_id = schedule_in(&queue, "fast", chrono::Duration::milliseconds(300)).await;

        let queue_dyn: Arc<dyn TaskQueue> = Arc::new(queue.clone());
        let d = Arc::new(Dispatcher::new(
            queue_dyn.clone(),
            Arc::new(registry),
            TaskRunner::new(queue_dyn, RetryConfig::default()),
            fast_config(),
        ));
        let started = Instant::now();
        let handle = tokio::spawn({
            let d = d.clone();
            async move { d.run().await }
        });

        let fast_done = wait_until(Duration::from_millis(1500), || {
            queue
                .find("fast", &fast_id)
                .map(|t| t.status == "succeeded")
                .unwrap_or(false)
        })
        .await;
        assert!(fast_done, "fast task waited on the slow one");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(fast_calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.find("slow", &slow_id).unwrap().status, "running");

        handle.abort();
    }

    #[tokio::test]
    async fn in_flight_cap_limits_leasing() {
        let mut registry = HandlerRegistry::new();
        registry.register("park", |_task, _ctx| {
            boxed(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
        });

        let queue = InMemoryTaskQueue::new();
        for _ in 0..5 {
            schedule(&queue, "park", 0).await;
        }

        let queue_dyn: Arc<dyn TaskQueue> = Arc::new(queue.clone());
        let d = Arc::new(Dispatcher::new(
            queue_dyn.clone(),
            Arc::new(registry),
            TaskRunner::new(queue_dyn, RetryConfig::default()),
            DispatcherConfig {
                max_in_flight: 2,
                ..fast_config()
            },
        ));
        let handle = tokio::spawn({
            let d = d.clone();
            async move { d.run().await }
        });

        assert!(wait_until(Duration::from_secs(1), || queue.count(TaskStatus::Running) == 2).await);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(queue.count(TaskStatus::Running), 2);
        assert_eq!(queue.count(TaskStatus::Queued), 3);

        handle.abort();
    }

    /// Fails the first `failures` reap and lease calls, then behaves.
    #[derive(Clone)]
    struct Unreliable {
        inner: InMemoryTaskQueue,
        failures: Arc<AtomicUsize>,
    }

    impl Unreliable {
        fn trip(&self) -> Result<(), ScheduleError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(());
            }
            self.failures.store(left - 1, Ordering::SeqCst);
            Err(ScheduleError::Unavailable("connection reset".into()))
        }
    }

    #[async_trait::async_trait]
    impl Scheduler for Unreliable {
        async fn schedule(&self, task: NewTask) -> Result<bool, ScheduleError> {
            self.inner.schedule(task).await
        }
    }

    #[async_trait::async_trait]
    impl TaskQueue for Unreliable {
        async fn lease_due(
            &self,
            worker_id: &str,
            lease_seconds: i64,
            limit: i64,
        ) -> Result<Vec<ScheduledTask>, ScheduleError> {
            self.trip()?;
            self.inner.lease_due(worker_id, lease_seconds, limit).await
        }

        async fn reap_expired_leases(&self) -> Result<u64, ScheduleError> {
            self.trip()?;
            self.inner.reap_expired_leases().await
        }

        async fn mark_succeeded(&self, id: Uuid, worker_id: &str) -> Result<bool, ScheduleError> {
            self.inner.mark_succeeded(id, worker_id).await
        }

        async fn reschedule_for_retry(
            &self,
            id: Uuid,
            worker_id: &str,
            next_run_at: chrono::DateTime<Utc>,
            error_code: &str,
            error_message: &str,
        ) -> Result<bool, ScheduleError> {
            self.inner
                .reschedule_for_retry(id, worker_id, next_run_at, error_code, error_message)
                .await
        }

        async fn mark_dead(
            &self,
            id: Uuid,
            worker_id: &str,
            reason_code: &str,
            error_code: &str,
            error_message: &str,
        ) -> Result<bool, ScheduleError> {
            self.inner
                .mark_dead(id, worker_id, reason_code, error_code, error_message)
                .await
        }
    }

    #[tokio::test]
    async fn queue_errors_are_survived_and_work_resumes() {
        let mut registry = HandlerRegistry::new();
        registry.register("count", |_task, _ctx| boxed(async move { Ok(()) }));

        let inner = InMemoryTaskQueue::new();
        let task_id = schedule(&inner, "count", 0).await;
        let queue: Arc<dyn TaskQueue> = Arc::new(Unreliable {
            inner: inner.clone(),
            failures: Arc::new(AtomicUsize::new(4)),
        });

        let d = Arc::new(Dispatcher::new(
            queue.clone(),
            Arc::new(registry),
            TaskRunner::new(queue, RetryConfig::default()),
            fast_config(),
        ));
        let handle = tokio::spawn({
            let d = d.clone();
            async move { d.run().await }
        });

        let done = wait_until(Duration::from_secs(3), || {
            inner
                .find("count", &task_id)
                .map(|t| t.status == "succeeded")
                .unwrap_or(false)
        })
        .await;
        assert!(done);
        assert!(!handle.is_finished());

        handle.abort();
    }
}
