pub mod handler;
pub mod webhook;

pub use handler::{register_fire_webhook, FireWebhook, FIRE_WEBHOOK};
pub use webhook::{WebhookExecutor, WebhookOutcome, DEFAULT_WEBHOOK_TIMEOUT, MAX_RESPONSE_BYTES};
