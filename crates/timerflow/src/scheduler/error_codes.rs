// src/scheduler/error_codes.rs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Timeout,
    Persistence,
    BadPayload,
    UnknownTaskType,
    TimerNotFound,
    WorkerShutdown,
    Unknown,
}

impl ErrorCode {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "TIMEOUT" => Self::Timeout,
            "PERSISTENCE" => Self::Persistence,
            "BAD_PAYLOAD" => Self::BadPayload,
            "UNKNOWN_TASK_TYPE" => Self::UnknownTaskType,
            "TIMER_NOT_FOUND" => Self::TimerNotFound,
            "WORKER_SHUTDOWN" => Self::WorkerShutdown,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::Persistence => "PERSISTENCE",
            Self::BadPayload => "BAD_PAYLOAD",
            Self::UnknownTaskType => "UNKNOWN_TASK_TYPE",
            Self::TimerNotFound => "TIMER_NOT_FOUND",
            Self::WorkerShutdown => "WORKER_SHUTDOWN",
            Self::Unknown => "UNKNOWN",
        }
    }
}
