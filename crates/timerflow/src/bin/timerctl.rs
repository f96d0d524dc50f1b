use anyhow::Context;
use std::env;
use std::sync::Arc;
use url::Url;

use timerflow::db;
use timerflow::scheduler::{PgTaskQueue, TaskStatus};
use timerflow::service::{TimerRequest, TimerService};
use timerflow::timers::PgTimerStore;

const MAX_ATTEMPTS: i32 = 5;

const USAGE: &str = "timerctl <command>\n\
     Commands:\n\
     - reset                    truncate timers and scheduled_tasks\n\
     - migrate                  apply pending migrations\n\
     - create <seconds> <url>   create a timer through the service\n\
     - show <timer_id>          print a timer record\n\
     - pending [limit]          list timers that have not fired\n\
     - tasks [status] [limit]   list scheduled tasks (queued|running|succeeded|dead)\n\
     \n\
     Uses DATABASE_URL or TEST_DATABASE_URL.\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args: Vec<String> = env::args().collect();

    let Some(command) = args.get(1) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let url = env::var("DATABASE_URL")
        .or_else(|_| env::var("TEST_DATABASE_URL"))
        .context("DATABASE_URL or TEST_DATABASE_URL must be set")?;
    let pool = db::make_pool(&url).await?;
    let service = TimerService::new(
        Arc::new(PgTimerStore::new(pool.clone())),
        Arc::new(PgTaskQueue::new(pool.clone())),
        MAX_ATTEMPTS,
    );

    match command.as_str() {
        "reset" => {
            sqlx::query("TRUNCATE TABLE scheduled_tasks, timers")
                .execute(&pool)
                .await?;
            println!("reset OK");
        }
        "migrate" => {
            db::run_migrations(&pool).await?;
            println!("migrations applied");
        }
        "create" => {
            let (Some(secs), Some(target)) = (args.get(2), args.get(3)) else {
                anyhow::bail!("usage: timerctl create <seconds> <url>");
            };
            let view = service
                .create_timer(TimerRequest {
                    hours: 0,
                    minutes: 0,
                    seconds: secs.parse().context("seconds must be a non-negative integer")?,
                    url: Url::parse(target).context("invalid url")?,
                })
                .await?;
            println!("+ timer id={} time_left={}", view.id, view.time_left);
        }
        "show" => {
            let raw = args
                .get(2)
                .context("usage: timerctl show <timer_id>")?;
            let timer = service.get(raw.parse()?).await?;
            println!("{}", serde_json::to_string_pretty(&timer)?);
        }
        "pending" => {
            let limit = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(50);
            let timers = PgTimerStore::new(pool.clone()).list_pending(limit).await?;
            for t in &timers {
                println!("{}  eta={}  url={}", t.id, t.eta.to_rfc3339(), t.url);
            }
            println!("{} pending", timers.len());
        }
        "tasks" => {
            let status = match args.get(2).map(String::as_str) {
                None | Some("queued") => TaskStatus::Queued,
                Some("running") => TaskStatus::Running,
                Some("succeeded") => TaskStatus::Succeeded,
                Some("dead") => TaskStatus::Dead,
                Some(other) => anyhow::bail!("unknown status: {other}"),
            };
            let limit = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(50);
            let tasks = PgTaskQueue::new(pool.clone())
                .list_by_status(status, limit)
                .await?;
            for t in &tasks {
                println!(
                    "{}  {}  task_id={}  run_at={}  attempts={}/{}  last_error={}",
                    t.id,
                    t.task_type,
                    t.task_id,
                    t.run_at.to_rfc3339(),
                    t.attempts,
                    t.max_attempts,
                    t.last_error_code.as_deref().unwrap_or("-"),
                );
            }
            println!("{} {}", tasks.len(), status.as_str());
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}
