//! Task-type → handler table used by the dispatcher.
//!
//! A handler receives a leased [`ScheduledTask`] and finishes with `Ok(())`
//! or a [`TaskError`] whose [`ErrorCode`] decides between retry and dead.
//! Each registration may carry a concurrency cap and a deadline; both are
//! applied here so handlers stay plain async closures.

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::scheduler::{ErrorCode, ScheduledTask};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type HandlerFn = dyn for<'a> Fn(&'a ScheduledTask, &'a TaskContext) -> BoxFuture<'a, Result<(), TaskError>>
    + Send
    + Sync;

#[derive(Debug, thiserror::Error)]
#[error("{}: {message}", .code.as_str())]
pub struct TaskError {
    pub code: ErrorCode,
    pub message: String,
}

impl TaskError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// What a handler knows about the delivery it is serving.
#[derive(Clone, Debug)]
pub struct TaskContext {
    pub worker_id: String,
    /// 1 on first delivery; higher after a retry or a reaped lease.
    pub attempt: i32,
}

impl TaskContext {
    pub fn new(worker_id: impl Into<String>, task: &ScheduledTask) -> Self {
        Self {
            worker_id: worker_id.into(),
            attempt: task.attempts,
        }
    }

    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

/// Per-registration limits.
#[derive(Clone, Debug, Default)]
pub struct HandlerOptions {
    max_concurrency: Option<usize>,
    timeout: Option<Duration>,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// At most `n` invocations at once across the whole process (minimum 1).
    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n.max(1));
        self
    }

    /// Fail the attempt with [`ErrorCode::Timeout`] once `dur` elapses.
    pub fn timeout(mut self, dur: Duration) -> Self {
        self.timeout = Some(dur);
        self
    }
}

/// A registered handler with its limits applied.
#[derive(Clone)]
pub struct Handler {
    call: Arc<HandlerFn>,
    permits: Option<Arc<Semaphore>>,
    deadline: Option<Duration>,
}

impl Handler {
    pub async fn run(&self, task: &ScheduledTask, ctx: &TaskContext) -> Result<(), TaskError> {
        // held until the call returns or is cut off
        let _permit = match &self.permits {
            Some(permits) => Some(permits.clone().acquire_owned().await.map_err(|_| {
                TaskError::new(ErrorCode::WorkerShutdown, "handler permits closed")
            })?),
            None => None,
        };

        let call = (self.call)(task, ctx);
        let Some(deadline) = self.deadline else {
            return call.await;
        };
        tokio::time::timeout(deadline, call).await.unwrap_or_else(|_| {
            Err(TaskError::new(
                ErrorCode::Timeout,
                format!("{} exceeded {}ms", task.task_type, deadline.as_millis()),
            ))
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.deadline
    }

    /// Free slots under the concurrency cap, `None` when uncapped.
    pub fn available_permits(&self) -> Option<usize> {
        self.permits.as_ref().map(|p| p.available_permits())
    }
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    by_type: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, task_type: &str, handler: F)
    where
        F: for<'a> Fn(&'a ScheduledTask, &'a TaskContext) -> BoxFuture<'a, Result<(), TaskError>>
            + Send
            + Sync
            + 'static,
    {
        self.register_with_options(task_type, handler, HandlerOptions::new());
    }

    /// Registering a type twice replaces the earlier handler.
    pub fn register_with_options<F>(&mut self, task_type: &str, handler: F, opts: HandlerOptions)
    where
        F: for<'a> Fn(&'a ScheduledTask, &'a TaskContext) -> BoxFuture<'a, Result<(), TaskError>>
            + Send
            + Sync
            + 'static,
    {
        let entry = Handler {
            call: Arc::new(handler),
            permits: opts.max_concurrency.map(|n| Arc::new(Semaphore::new(n))),
            deadline: opts.timeout,
        };
        if self.by_type.insert(task_type.to_string(), entry).is_some() {
            tracing::warn!(task_type, "handler replaced");
        }
    }

    pub fn handler_for(&self, task_type: &str) -> Option<Handler> {
        self.by_type.get(task_type).cloned()
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.by_type.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

/// Decode a task's JSON payload. A mismatch is [`ErrorCode::BadPayload`],
/// which is never retried.
pub fn parse_payload<T: DeserializeOwned>(task: &ScheduledTask) -> Result<T, TaskError> {
    T::deserialize(&task.payload_json).map_err(|e| {
        TaskError::new(
            ErrorCode::BadPayload,
            format!("{} payload: {e}", task.task_type),
        )
    })
}

pub fn boxed<'a, T>(fut: impl Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(fut)
}
