// crates/timerflow/src/api/models.rs
use serde::Serialize;

use crate::timers::TimerId;

#[derive(Debug, Clone, Serialize)]
pub struct TimerResponse {
    pub id: TimerId,
    pub time_left: i64,
}

/// One entry of a 422 `detail` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FieldError {
    pub fn new(loc: &[&str], msg: impl Into<String>, kind: &str) -> Self {
        Self {
            loc: loc.iter().map(|s| s.to_string()).collect(),
            msg: msg.into(),
            kind: kind.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DetailBody<T: Serialize> {
    pub detail: T,
}
