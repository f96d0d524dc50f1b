use std::sync::Arc;

use timerflow::config::Config;
use timerflow::dispatch::{HandlerOptions, HandlerRegistry};
use timerflow::executor::{register_fire_webhook, WebhookExecutor};

/// Every task type this worker can run.
pub fn build_registry(executor: Arc<WebhookExecutor>, cfg: &Config) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    register_fire_webhook(
        &mut registry,
        executor,
        HandlerOptions::new()
            .max_concurrency(cfg.webhook_concurrency)
            .timeout(cfg.handler_timeout),
    );

    registry
}
