use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::dispatch::{boxed, parse_payload, HandlerOptions, HandlerRegistry, TaskError};
use crate::executor::webhook::WebhookExecutor;
use crate::scheduler::{ErrorCode, NewTask};
use crate::store::StoreError;
use crate::timers::{TimerId, TimerRecord};

pub const FIRE_WEBHOOK: &str = "fire_webhook";

/// Payload of a `fire_webhook` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireWebhook {
    pub timer_id: TimerId,
    pub url: String,
}

impl FireWebhook {
    pub fn for_timer(timer: &TimerRecord) -> Self {
        Self {
            timer_id: timer.id,
            url: timer.url.clone(),
        }
    }

    pub fn into_task(self, ready_at: DateTime<Utc>, max_attempts: i32) -> NewTask {
        NewTask {
            task_type: FIRE_WEBHOOK.to_string(),
            task_id: self.timer_id.to_string(),
            payload_json: json!({
                "timer_id": self.timer_id,
                "url": self.url,
            }),
            ready_at,
            max_attempts,
        }
    }
}

fn task_error(err: StoreError) -> TaskError {
    let code = match &err {
        StoreError::NotFound { .. } => ErrorCode::TimerNotFound,
        StoreError::InvalidIdentifier(_) => ErrorCode::BadPayload,
        StoreError::Persistence(_) | StoreError::Unavailable(_) => ErrorCode::Persistence,
    };
    TaskError::new(code, err.to_string())
}

pub fn register_fire_webhook(
    registry: &mut HandlerRegistry,
    executor: Arc<WebhookExecutor>,
    opts: HandlerOptions,
) {
    registry.register_with_options(
        FIRE_WEBHOOK,
        move |task, ctx| {
            let executor = executor.clone();
            boxed(async move {
                let payload: FireWebhook = parse_payload(task)?;
                if ctx.is_redelivery() {
                    tracing::info!(
                        timer_id = %payload.timer_id,
                        attempt = ctx.attempt,
                        "firing webhook again; the latest outcome replaces the stored one"
                    );
                }
                executor
                    .execute(payload.timer_id, &payload.url)
                    .await
                    .map(|_| ())
                    .map_err(task_error)
            })
        },
        opts,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Dispatcher, DispatcherConfig, TaskRunner};
    use crate::scheduler::retry::RetryConfig;
    use crate::scheduler::{InMemoryTaskQueue, Scheduler, TaskQueue, TaskStatus};
    use crate::store::Store;
    use crate::timers::{InMemoryTimerStore, NewTimer, TimerStore};
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn payload_round_trips_through_task_json() {
        let timer_id = TimerId::new();
        let task = FireWebhook {
            timer_id,
            url: "http://h/ok".into(),
        }
        .into_task(Utc::now(), 5);

        assert_eq!(task.task_type, FIRE_WEBHOOK);
        assert_eq!(task.task_id, timer_id.to_string());
        let back: FireWebhook = serde_json::from_value(task.payload_json).unwrap();
        assert_eq!(back.timer_id, timer_id);
        assert_eq!(back.url, "http://h/ok");
    }

    #[tokio::test]
    async fn dispatcher_fires_due_timer_and_completes_task() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let store = InMemoryTimerStore::new();
        let timers: Arc<TimerStore> = Arc::new(store.clone());
        let queue = InMemoryTaskQueue::new();
        let tasks: Arc<dyn TaskQueue> = Arc::new(queue.clone());

        let timer = store
            .create(NewTimer::after(chrono::Duration::zero(), format!("{}/ok", server.uri())).unwrap())
            .await
            .unwrap();
        queue
            .schedule(FireWebhook::for_timer(&timer).into_task(timer.eta, 5))
            .await
            .unwrap();

        let executor = Arc::new(WebhookExecutor::new(timers, Duration::from_secs(5)).unwrap());
        let mut registry = HandlerRegistry::new();
        register_fire_webhook(&mut registry, executor, HandlerOptions::new());

        let dispatcher = Dispatcher::new(
            tasks.clone(),
            Arc::new(registry),
            TaskRunner::new(tasks, RetryConfig::default()),
            DispatcherConfig::default(),
        );
        assert_eq!(dispatcher.run_once().await.unwrap(), 1);

        let fired = store.get(timer.id).await.unwrap();
        assert_eq!(fired.success, Some(true));
        assert_eq!(fired.status_code, Some(200));
        assert_eq!(queue.count(TaskStatus::Succeeded), 1);
    }

    #[tokio::test]
    async fn missing_timer_kills_the_task() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let timers: Arc<TimerStore> = Arc::new(InMemoryTimerStore::new());
        let queue = InMemoryTaskQueue::new();
        let tasks: Arc<dyn TaskQueue> = Arc::new(queue.clone());
        let ghost = FireWebhook {
            timer_id: TimerId::new(),
            url: format!("{}/hook", server.uri()),
        };
        queue.schedule(ghost.clone().into_task(Utc::now(), 5)).await.unwrap();

        let executor = Arc::new(WebhookExecutor::new(timers, Duration::from_secs(5)).unwrap());
        let mut registry = HandlerRegistry::new();
        register_fire_webhook(&mut registry, executor, HandlerOptions::new());

        let dispatcher = Dispatcher::new(
            tasks.clone(),
            Arc::new(registry),
            TaskRunner::new(tasks, RetryConfig::default()),
            DispatcherConfig::default(),
        );
        dispatcher.run_once().await.unwrap();

        let row = queue.find(FIRE_WEBHOOK, &ghost.timer_id.to_string()).unwrap();
        assert_eq!(row.status, "dead");
        assert_eq!(row.last_error_code.as_deref(), Some("TIMER_NOT_FOUND"));
    }
}
