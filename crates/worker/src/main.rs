use std::sync::Arc;

use timerflow::api;
use timerflow::config::Config;
use timerflow::db;
use timerflow::dispatch::{Dispatcher, TaskRunner};
use timerflow::executor::WebhookExecutor;
use timerflow::maintenance::MaintenanceRepo;
use timerflow::metrics::MetricsRepo;
use timerflow::scheduler::retry::RetryConfig;
use timerflow::scheduler::PgTaskQueue;
use timerflow::service::TimerService;
use timerflow::telemetry;
use timerflow::timers::{PgTimerStore, TimerStore};

mod handlers;
use handlers::build_registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    telemetry::init_tracing("info,sqlx=warn");

    tracing::info!(
        worker_id = %cfg.worker_id,
        api = %cfg.api_addr.map(|a| a.to_string()).unwrap_or_else(|| "disabled".to_string()),
        run_worker = cfg.run_worker,
        lease_seconds = cfg.lease_seconds,
        dequeue_batch_size = cfg.dequeue_batch_size,
        webhook_timeout_secs = cfg.webhook_timeout.as_secs(),
        webhook_concurrency = cfg.webhook_concurrency,
        max_attempts = cfg.max_attempts,
        migrate_on_startup = cfg.migrate_on_startup,
        "timerflow starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
        tracing::info!("migrations applied");
    }

    let timers: Arc<TimerStore> = Arc::new(PgTimerStore::new(pool.clone()));
    let queue = Arc::new(PgTaskQueue::new(pool.clone()));

    // ---- API task ----
    let api_handle = {
        let state = api::ApiState {
            timers: TimerService::new(timers.clone(), queue.clone(), cfg.max_attempts),
            metrics: Some(MetricsRepo::new(pool.clone())),
        };
        let app = api::router(state);
        let api_addr = cfg.api_addr;

        tokio::spawn(async move {
            if let Some(addr) = api_addr {
                let listener = tokio::net::TcpListener::bind(addr).await?;
                tracing::info!(%addr, "api listening");
                axum::serve(listener, app).await?;
            } else {
                std::future::pending::<()>().await;
            }
            Ok::<(), anyhow::Error>(())
        })
    };

    // ---- Maintenance task ----
    let maintenance_handle = {
        let maintenance = MaintenanceRepo::new(pool.clone());
        let maintenance_cfg = cfg.maintenance();
        tokio::spawn(async move {
            maintenance.run(maintenance_cfg).await;
            Ok::<(), anyhow::Error>(())
        })
    };

    // ---- Dispatcher task ----
    let worker_handle = {
        let executor = Arc::new(WebhookExecutor::new(timers.clone(), cfg.webhook_timeout)?);
        let registry = Arc::new(build_registry(executor, &cfg));
        let dispatcher = Dispatcher::new(
            queue.clone(),
            registry,
            TaskRunner::new(queue.clone(), RetryConfig::default()),
            cfg.dispatcher(),
        );
        let run_worker = cfg.run_worker;

        tokio::spawn(async move {
            if run_worker {
                dispatcher.run().await;
            } else {
                std::future::pending::<()>().await;
            }
            Ok::<(), anyhow::Error>(())
        })
    };

    tokio::select! {
        res = api_handle => res??,
        res = worker_handle => res??,
        res = maintenance_handle => res??,
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("shutdown requested; leased tasks will be reaped after their lease expires");
        }
    }

    Ok(())
}
