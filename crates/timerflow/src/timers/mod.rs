pub mod in_memory;
pub mod model;
pub mod repo;

pub use in_memory::InMemoryTimerStore;
pub use model::{NewTimer, TimerId, TimerOutcome, TimerRecord, TimerState};
pub use repo::PgTimerStore;

use crate::store::Store;

pub type TimerStore = dyn Store<TimerRecord>;
