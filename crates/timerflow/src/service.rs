//! Turns accepted timer requests into a stored record plus a scheduled
//! `fire_webhook` task, and answers remaining-time queries.

use chrono::{Duration, Utc};
use std::sync::Arc;
use url::Url;

use crate::executor::FireWebhook;
use crate::scheduler::{ScheduleError, Scheduler};
use crate::store::StoreError;
use crate::timers::{NewTimer, TimerId, TimerRecord, TimerStore};

/// A validated timer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerRequest {
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
    pub url: Url,
}

impl TimerRequest {
    /// `hours*3600 + minutes*60 + seconds`, or `None` if that overflows what
    /// a timestamp offset can hold.
    pub fn total_seconds(&self) -> Option<i64> {
        let total = self
            .hours
            .checked_mul(3600)?
            .checked_add(self.minutes.checked_mul(60)?)?
            .checked_add(self.seconds)?;
        let total = i64::try_from(total).ok()?;
        Duration::try_seconds(total).map(|_| total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerView {
    pub id: TimerId,
    pub time_left: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("duration too large")]
    DurationOverflow,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("timer {timer_id} stored but not scheduled: {source}")]
    Scheduling {
        timer_id: TimerId,
        #[source]
        source: ScheduleError,
    },
}

#[derive(Clone)]
pub struct TimerService {
    timers: Arc<TimerStore>,
    scheduler: Arc<dyn Scheduler>,
    max_attempts: i32,
}

impl TimerService {
    pub fn new(timers: Arc<TimerStore>, scheduler: Arc<dyn Scheduler>, max_attempts: i32) -> Self {
        Self {
            timers,
            scheduler,
            max_attempts,
        }
    }

    pub async fn create_timer(&self, req: TimerRequest) -> Result<TimerView, ServiceError> {
        let total = req.total_seconds().ok_or(ServiceError::DurationOverflow)?;
        let new = NewTimer::after(Duration::seconds(total), req.url.as_str())
            .ok_or(ServiceError::DurationOverflow)?;

        let timer = self.timers.create(new).await?;

        // A failure here leaves the timer pending; the maintenance orphan
        // sweep schedules it later.
        self.scheduler
            .schedule(FireWebhook::for_timer(&timer).into_task(timer.eta, self.max_attempts))
            .await
            .map_err(|source| ServiceError::Scheduling {
                timer_id: timer.id,
                source,
            })?;

        tracing::info!(timer_id = %timer.id, eta = %timer.eta, url = %timer.url, "timer scheduled");

        Ok(TimerView {
            id: timer.id,
            time_left: total,
        })
    }

    pub async fn time_left(&self, raw_id: &str) -> Result<TimerView, ServiceError> {
        let id: TimerId = raw_id.parse()?;
        let timer = self.timers.get(id).await?;
        Ok(TimerView {
            id: timer.id,
            time_left: timer.seconds_left(Utc::now()),
        })
    }

    pub async fn get(&self, id: TimerId) -> Result<TimerRecord, ServiceError> {
        Ok(self.timers.get(id).await?)
    }
}
