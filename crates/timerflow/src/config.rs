use std::net::SocketAddr;
use std::time::Duration;

use crate::dispatch::DispatcherConfig;
use crate::maintenance::MaintenanceConfig;

/// Headroom a lease keeps over the handler deadline.
const LEASE_MARGIN_SECS: u64 = 5;
const DEFAULT_LEASE_SECS: u64 = 30;

/// Runtime configuration, loaded from `TIMERFLOW_*` environment variables
/// (with unprefixed fallbacks for the common ones).
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    /// `None` disables the HTTP API on this process.
    pub api_addr: Option<SocketAddr>,
    pub run_worker: bool,
    pub worker_id: String,
    pub lease_seconds: i64,
    pub dequeue_batch_size: i64,
    pub poll_interval: Duration,
    pub reap_interval: Duration,
    pub webhook_timeout: Duration,
    pub webhook_concurrency: usize,
    pub handler_timeout: Duration,
    pub max_attempts: i32,
    pub migrate_on_startup: bool,
    pub prune_tasks_after_days: i64,
    pub orphan_grace: Duration,
    pub maintenance_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());
        let either = |primary: &str, fallback: &str| get(primary).or_else(|| get(fallback));

        let database_url = get("DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let api_addr = match either("TIMERFLOW_API_ADDR", "API_ADDR") {
            None => Some(SocketAddr::from(([0, 0, 0, 0], 8080))),
            Some(raw) => match normalize_optional_addr(&raw) {
                None => None,
                Some(addr) => Some(
                    addr.parse()
                        .map_err(|e| anyhow::anyhow!("TIMERFLOW_API_ADDR {addr:?}: {e}"))?,
                ),
            },
        };

        let worker_id = either("TIMERFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| get("HOSTNAME"))
            .unwrap_or_else(|| "worker-1".to_string());

        let run_worker = get("TIMERFLOW_RUN_WORKER")
            .map(|v| parse_bool(&v))
            .unwrap_or(true);

        let dequeue_batch_size = parsed(&get("TIMERFLOW_DEQUEUE_BATCH_SIZE"), 16i64).clamp(1, 500);
        let poll_interval =
            Duration::from_millis(parsed(&get("TIMERFLOW_POLL_INTERVAL_MS"), 250u64).max(10));
        let reap_interval =
            Duration::from_millis(parsed(&get("TIMERFLOW_REAP_INTERVAL_MS"), 1000u64).max(10));

        let webhook_timeout =
            Duration::from_secs(parsed(&get("TIMERFLOW_WEBHOOK_TIMEOUT_SECS"), 10u64).max(1));
        let webhook_concurrency = parsed(&get("TIMERFLOW_WEBHOOK_CONCURRENCY"), 64usize).max(1);
        // handler deadline stays above the HTTP timeout so the outcome is written
        let handler_timeout = webhook_timeout + Duration::from_secs(5);

        let min_lease = handler_timeout.as_secs() + LEASE_MARGIN_SECS;
        let lease_seconds = match either("TIMERFLOW_LEASE_SECONDS", "LEASE_SECONDS") {
            None => DEFAULT_LEASE_SECS.max(min_lease),
            Some(raw) => {
                let lease: u64 = raw
                    .trim()
                    .parse()
                    .map_err(|e| anyhow::anyhow!("TIMERFLOW_LEASE_SECONDS {raw:?}: {e}"))?;
                if lease < min_lease {
                    anyhow::bail!(
                        "TIMERFLOW_LEASE_SECONDS={lease} must be at least {min_lease} \
                         (handler timeout {}s + {LEASE_MARGIN_SECS}s)",
                        handler_timeout.as_secs()
                    );
                }
                lease
            }
        };
        let lease_seconds = i64::try_from(lease_seconds)
            .map_err(|_| anyhow::anyhow!("TIMERFLOW_LEASE_SECONDS out of range"))?;

        let max_attempts = parsed(&get("TIMERFLOW_MAX_ATTEMPTS"), 5i32).max(1);

        let migrate_on_startup = get("TIMERFLOW_MIGRATE_ON_STARTUP")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        let prune_tasks_after_days = parsed(&get("TIMERFLOW_PRUNE_TASKS_AFTER_DAYS"), 7i64).max(0);
        let orphan_grace =
            Duration::from_secs(parsed(&get("TIMERFLOW_ORPHAN_GRACE_SECS"), 60u64));
        let maintenance_interval =
            Duration::from_secs(parsed(&get("TIMERFLOW_MAINTENANCE_INTERVAL_SECS"), 60u64).max(1));

        Ok(Self {
            database_url,
            api_addr,
            run_worker,
            worker_id,
            lease_seconds,
            dequeue_batch_size,
            poll_interval,
            reap_interval,
            webhook_timeout,
            webhook_concurrency,
            handler_timeout,
            max_attempts,
            migrate_on_startup,
            prune_tasks_after_days,
            orphan_grace,
            maintenance_interval,
        })
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            worker_id: self.worker_id.clone(),
            lease_seconds: self.lease_seconds,
            batch_size: self.dequeue_batch_size,
            max_in_flight: self.webhook_concurrency,
            poll_interval: self.poll_interval,
            reap_interval: self.reap_interval,
        }
    }

    pub fn maintenance(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            interval: self.maintenance_interval,
            prune_after_days: self.prune_tasks_after_days,
            orphan_grace: chrono::Duration::from_std(self.orphan_grace)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            max_attempts: self.max_attempts,
            ..MaintenanceConfig::default()
        }
    }
}

fn parsed<T: std::str::FromStr>(raw: &Option<String>, default: T) -> T {
    raw.as_deref()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(v: &str) -> bool {
    matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
