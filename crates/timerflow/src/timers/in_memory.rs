//! HashMap-backed timer store for tests and embedded use.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::store::{Store, StoreError};
use crate::timers::model::{NewTimer, TimerId, TimerOutcome, TimerRecord};

#[derive(Clone, Default)]
pub struct InMemoryTimerStore {
    records: Arc<RwLock<HashMap<TimerId, TimerRecord>>>,
}

impl InMemoryTimerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".into())
}

#[async_trait]
impl Store<TimerRecord> for InMemoryTimerStore {
    async fn create(&self, new: NewTimer) -> Result<TimerRecord, StoreError> {
        let rec = TimerRecord {
            id: TimerId::new(),
            eta: new.eta,
            url: new.url,
            created: new.requested_at,
            updated: new.requested_at,
            status_code: None,
            success: None,
            response: None,
            user_id: new.owner,
        };

        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(rec.id, rec.clone());
        Ok(rec)
    }

    async fn get(&self, id: TimerId) -> Result<TimerRecord, StoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        records
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found::<TimerRecord>(id))
    }

    async fn update(
        &self,
        id: TimerId,
        outcome: TimerOutcome,
        owner: Option<Uuid>,
    ) -> Result<TimerRecord, StoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let rec = records
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found::<TimerRecord>(id))?;

        rec.status_code = outcome.status_code;
        rec.success = Some(outcome.success);
        rec.response = outcome.response;
        if owner.is_some() {
            rec.user_id = owner;
        }
        rec.updated = rec.updated.max(Utc::now());

        Ok(rec.clone())
    }
}
