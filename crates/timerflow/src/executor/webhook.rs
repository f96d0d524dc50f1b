//! Fires a timer's webhook and records what happened on the timer.
//!
//! One call is one attempt. Nothing here retries: a non-200 answer or a
//! transport error is written to the timer as a failed outcome and that is
//! final unless the scheduler redelivers the task, in which case the latest
//! attempt overwrites the outcome.

use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

use crate::store::{Store, StoreError};
use crate::timers::{TimerId, TimerOutcome, TimerRecord, TimerStore};

pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes of a webhook response body kept on the timer. The rest is dropped
/// unread.
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The target answered 200.
    Success { body: String },
    /// The target answered, with anything but 200.
    DeliveryFailure { status: u16, body: String },
    /// No HTTP status was obtained: timeout, refused connection, DNS, bad URL.
    TransportError { message: String },
}

impl WebhookOutcome {
    pub fn from_response(status: StatusCode, body: String) -> Self {
        if status == StatusCode::OK {
            WebhookOutcome::Success { body }
        } else {
            WebhookOutcome::DeliveryFailure {
                status: status.as_u16(),
                body,
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WebhookOutcome::Success { .. } => "success",
            WebhookOutcome::DeliveryFailure { .. } => "delivery_failure",
            WebhookOutcome::TransportError { .. } => "transport_error",
        }
    }
}

impl From<WebhookOutcome> for TimerOutcome {
    fn from(outcome: WebhookOutcome) -> Self {
        match outcome {
            WebhookOutcome::Success { body } => TimerOutcome {
                status_code: Some(i32::from(StatusCode::OK.as_u16())),
                success: true,
                response: Some(body),
            },
            WebhookOutcome::DeliveryFailure { status, body } => TimerOutcome {
                status_code: Some(i32::from(status)),
                success: false,
                response: Some(body),
            },
            WebhookOutcome::TransportError { message } => TimerOutcome {
                status_code: None,
                success: false,
                response: Some(message),
            },
        }
    }
}

#[derive(Clone)]
pub struct WebhookExecutor {
    client: reqwest::Client,
    timers: Arc<TimerStore>,
}

impl WebhookExecutor {
    pub fn new(timers: Arc<TimerStore>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("timerflow/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, timers))
    }

    pub fn with_client(client: reqwest::Client, timers: Arc<TimerStore>) -> Self {
        Self { client, timers }
    }

    /// POST `id=<timer id>` to `url` and classify the result.
    pub async fn fire(&self, timer_id: TimerId, url: &str) -> WebhookOutcome {
        let id = timer_id.to_string();
        let sent = self
            .client
            .post(url)
            .form(&[("id", id.as_str())])
            .send()
            .await;

        let resp = match sent {
            Ok(resp) => resp,
            Err(e) => {
                return WebhookOutcome::TransportError {
                    message: error_chain(&e),
                }
            }
        };

        let status = resp.status();
        // the status is already known; a body that fails to arrive is reported in its place
        let body = match read_capped(resp, MAX_RESPONSE_BYTES).await {
            Ok(body) => body,
            Err(e) => error_chain(&e),
        };
        WebhookOutcome::from_response(status, body)
    }

    /// Fire the webhook and write the outcome back. The write happens for
    /// every outcome, so a timer is never left pending once this has run.
    pub async fn execute(&self, timer_id: TimerId, url: &str) -> Result<TimerRecord, StoreError> {
        let outcome = self.fire(timer_id, url).await;

        match &outcome {
            WebhookOutcome::Success { .. } => {
                tracing::info!(%timer_id, url, "webhook delivered")
            }
            WebhookOutcome::DeliveryFailure { status, .. } => {
                tracing::warn!(%timer_id, url, status, "webhook rejected")
            }
            WebhookOutcome::TransportError { message } => {
                tracing::warn!(%timer_id, url, error = %message, "webhook transport error")
            }
        }

        self.timers.update(timer_id, outcome.into(), None).await
    }
}

/// Read at most `cap` bytes of the body, decoded as lossy UTF-8.
async fn read_capped(mut resp: reqwest::Response, cap: usize) -> Result<String, reqwest::Error> {
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        let room = cap - buf.len();
        if chunk.len() >= room {
            buf.extend_from_slice(&chunk[..room]);
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
