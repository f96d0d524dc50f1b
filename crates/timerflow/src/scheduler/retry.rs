// Redelivery policy for tasks whose handler failed before it could finish.
// A webhook that answered non-200 is not a handler failure; see executor.

use rand::Rng;

use crate::scheduler::error_codes::ErrorCode;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_seconds: i64,
    pub max_seconds: i64,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_seconds: 2,
            max_seconds: 15 * 60,
            jitter_pct: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
}

pub fn classify_error(code: ErrorCode) -> ErrorClass {
    match code {
        ErrorCode::Timeout | ErrorCode::Persistence | ErrorCode::WorkerShutdown => {
            ErrorClass::Retryable
        }
        ErrorCode::BadPayload | ErrorCode::UnknownTaskType | ErrorCode::TimerNotFound => {
            ErrorClass::NonRetryable
        }
        ErrorCode::Unknown => ErrorClass::Retryable,
    }
}

pub fn next_delay_seconds(attempt_no: i32, cfg: &RetryConfig, rng: &mut impl Rng) -> i64 {
    let attempt_no = attempt_no.max(1) as u32;

    // exponent = attempt_no - 1
    let exp = attempt_no.saturating_sub(1);

    // 2^exp; shifts past 62 saturate and the cap below takes over
    let pow2 = if exp < 63 { 1_i64 << exp } else { i64::MAX };

    let delay = cfg.base_seconds.saturating_mul(pow2).min(cfg.max_seconds);

    // jitter in range [-jitter_pct, +jitter_pct]
    let jitter_range = (delay as f64) * cfg.jitter_pct;
    let jitter = if jitter_range > 0.0 {
        rng.gen_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };

    let jittered = (delay as f64 + jitter).round() as i64;
    jittered.clamp(0, cfg.max_seconds)
}
