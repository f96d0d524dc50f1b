// tests/leasing.rs
mod common;

use chrono::{Duration, Utc};
use serial_test::serial;
use std::sync::Arc;

use common::{schedule_at, setup_db};
use timerflow::scheduler::{PgTaskQueue, TaskQueue, TaskStatus};

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn future_tasks_are_not_leased_early() {
    let pool = setup_db().await;
    let queue = Arc::new(PgTaskQueue::new(pool));

    schedule_at(&queue, "test_task", Utc::now() + Duration::seconds(30)).await;
    let leased = queue.lease_due("worker-a", 30, 10).await.unwrap();
    assert!(leased.is_empty());
}

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn past_tasks_are_leased_immediately() {
    let pool = setup_db().await;
    let queue = Arc::new(PgTaskQueue::new(pool));

    let task_id = schedule_at(&queue, "test_task", Utc::now() - Duration::seconds(5)).await;
    let leased = queue.lease_due("worker-a", 30, 10).await.unwrap();

    assert_eq!(leased.len(), 1);
    let task = &leased[0];
    assert_eq!(task.task_id, task_id);
    assert_eq!(task.status, TaskStatus::Running.as_str());
    assert_eq!(task.attempts, 1);
    assert_eq!(task.locked_by.as_deref(), Some("worker-a"));
    assert!(task.lock_expires_at.is_some());
}

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn two_workers_never_lease_the_same_task() {
    let pool = setup_db().await;
    let queue = Arc::new(PgTaskQueue::new(pool));

    for _ in 0..20 {
        schedule_at(&queue, "test_task", Utc::now() - Duration::seconds(1)).await;
    }

    let (qa, qb) = (queue.clone(), queue.clone());
    let (a, b) = tokio::join!(
        async move { qa.lease_due("worker-a", 30, 15).await.unwrap() },
        async move { qb.lease_due("worker-b", 30, 15).await.unwrap() },
    );

    let mut ids: Vec<_> = a.iter().chain(b.iter()).map(|t| t.id).collect();
    let total = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), total, "a task was leased twice");
    assert_eq!(total, 20);
}

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn expired_lease_is_reaped_and_redelivered() {
    let pool = setup_db().await;
    let queue = Arc::new(PgTaskQueue::new(pool));

    let task_id = schedule_at(&queue, "test_task", Utc::now() - Duration::seconds(1)).await;
    let first = queue.lease_due("worker-a", 1, 10).await.unwrap();
    assert_eq!(first.len(), 1);

    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;

    assert_eq!(queue.reap_expired_leases().await.unwrap(), 1);
    let second = queue.lease_due("worker-b", 30, 10).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].task_id, task_id);
    assert_eq!(second[0].attempts, 2);

    // worker-a lost its lease; its completion must not apply
    assert!(!queue.mark_succeeded(first[0].id, "worker-a").await.unwrap());
    assert!(queue.mark_succeeded(second[0].id, "worker-b").await.unwrap());

    let row = queue.get_task("test_task", &task_id).await.unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Succeeded.as_str());
    assert!(row.locked_by.is_none());
}

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn retry_and_dead_transitions() {
    let pool = setup_db().await;
    let queue = Arc::new(PgTaskQueue::new(pool.clone()));

    let task_id = schedule_at(&queue, "test_task", Utc::now() - Duration::seconds(1)).await;
    let leased = queue.lease_due("worker-a", 30, 1).await.unwrap();

    let later = Utc::now() + Duration::seconds(60);
    assert!(queue
        .reschedule_for_retry(leased[0].id, "worker-a", later, "TIMEOUT", "slow")
        .await
        .unwrap());
    assert!(queue.lease_due("worker-a", 30, 1).await.unwrap().is_empty());

    let row = queue.get_task("test_task", &task_id).await.unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Queued.as_str());
    assert_eq!(row.last_error_code.as_deref(), Some("TIMEOUT"));
    assert!(row.locked_by.is_none());

    // pull the retry forward instead of sleeping a minute
    sqlx::query("UPDATE scheduled_tasks SET run_at = now() WHERE id = $1")
        .bind(row.id)
        .execute(&pool)
        .await
        .unwrap();

    let leased = queue.lease_due("worker-b", 30, 1).await.unwrap();
    assert_eq!(leased[0].attempts, 2);
    assert!(queue
        .mark_dead(leased[0].id, "worker-b", "NON_RETRYABLE", "BAD_PAYLOAD", "bad json")
        .await
        .unwrap());

    let row = queue.get_task("test_task", &task_id).await.unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Dead.as_str());
    assert_eq!(row.dead_reason_code.as_deref(), Some("NON_RETRYABLE"));
    assert_eq!(queue.list_by_status(TaskStatus::Dead, 10).await.unwrap().len(), 1);
}
