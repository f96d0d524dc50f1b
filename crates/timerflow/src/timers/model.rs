use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use uuid::Uuid;

use crate::store::{Entity, StoreError};

/// Twelve-byte timer identifier, written as 24 lowercase hex characters.
///
/// Layout follows the usual object-id shape: 4 bytes of big-endian unix
/// seconds, 5 bytes fixed for the process, then a 3-byte counter. Ids minted
/// in one process are unique and order by creation second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId([u8; 12]);

const COUNTER_MASK: u32 = 0x00ff_ffff;

fn process_unique() -> &'static [u8; 5] {
    static BYTES: OnceLock<[u8; 5]> = OnceLock::new();
    BYTES.get_or_init(rand::random)
}

fn next_counter() -> u32 {
    static COUNTER: OnceLock<AtomicU32> = OnceLock::new();
    COUNTER
        .get_or_init(|| AtomicU32::new(rand::random::<u32>() & COUNTER_MASK))
        .fetch_add(1, Ordering::Relaxed)
        & COUNTER_MASK
}

impl TimerId {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Mints an id whose timestamp part is `at`. Seconds outside the u32
    /// range wrap, same as any other object id.
    pub fn at(at: DateTime<Utc>) -> Self {
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&(at.timestamp() as u32).to_be_bytes());
        bytes[4..9].copy_from_slice(process_unique());
        bytes[9..].copy_from_slice(&next_counter().to_be_bytes()[1..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        let secs = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        DateTime::from_timestamp(i64::from(secs), 0).unwrap_or_default()
    }
}

impl Default for TimerId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for TimerId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidIdentifier(s.to_string());
        let raw = s.trim();
        if raw.len() != 24 {
            return Err(invalid());
        }
        let decoded = hex::decode(raw).map_err(|_| invalid())?;
        let bytes: [u8; 12] = decoded.try_into().map_err(|_| invalid())?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for TimerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// Stored as its 24-char hex text in a CHAR(24) column.
impl Type<Postgres> for TimerId {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl Encode<'_, Postgres> for TimerId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> IsNull {
        <String as Encode<'_, Postgres>>::encode_by_ref(&self.to_string(), buf)
    }
}

impl<'r> Decode<'r, Postgres> for TimerId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as Decode<'r, Postgres>>::decode(value)?;
        Ok(raw.parse::<TimerId>()?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TimerRecord {
    pub id: TimerId,
    pub eta: DateTime<Utc>,
    pub url: String,

    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,

    pub status_code: Option<i32>,
    pub success: Option<bool>,
    pub response: Option<String>,

    // reserved for per-owner authorization
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Pending,
    Fired,
}

impl TimerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerState::Pending => "pending",
            TimerState::Fired => "fired",
        }
    }
}

impl TimerRecord {
    pub fn state(&self) -> TimerState {
        if self.success.is_some() {
            TimerState::Fired
        } else {
            TimerState::Pending
        }
    }

    /// Whole seconds until `eta`, floored, never negative.
    pub fn seconds_left(&self, now: DateTime<Utc>) -> i64 {
        let left = self.eta - now;
        if left <= chrono::Duration::zero() {
            return 0;
        }
        left.num_seconds()
    }
}

impl Entity for TimerRecord {
    type Id = TimerId;
    type New = NewTimer;
    type Patch = TimerOutcome;

    const COLLECTION: &'static str = "timer";

    fn id(&self) -> TimerId {
        self.id
    }
}

#[derive(Debug, Clone)]
pub struct NewTimer {
    pub eta: DateTime<Utc>,
    pub url: String,
    pub owner: Option<Uuid>,
    pub requested_at: DateTime<Utc>,
}

impl NewTimer {
    /// A timer due `delay` after now. Both timestamps come from one clock
    /// reading so `eta >= created` holds exactly.
    pub fn after(delay: chrono::Duration, url: impl Into<String>) -> Option<Self> {
        let now = Utc::now();
        let eta = now.checked_add_signed(delay)?;
        Some(Self {
            eta,
            url: url.into(),
            owner: None,
            requested_at: now,
        })
    }

    pub fn with_owner(mut self, owner: Uuid) -> Self {
        self.owner = Some(owner);
        self
    }
}

/// Result of one webhook attempt, written back onto the timer.
///
/// All three fields are replaced together, so a record always reflects the
/// latest attempt only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerOutcome {
    pub status_code: Option<i32>,
    pub success: bool,
    pub response: Option<String>,
}
