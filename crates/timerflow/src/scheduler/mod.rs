pub mod error_codes;
pub mod in_memory;
pub mod model;
pub mod queue;
pub mod repo;
pub mod retry;

pub use error_codes::ErrorCode;
pub use in_memory::InMemoryTaskQueue;
pub use model::{NewTask, ScheduledTask, TaskStatus};
pub use queue::{ScheduleError, Scheduler, TaskQueue};
pub use repo::PgTaskQueue;
