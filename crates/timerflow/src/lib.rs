pub mod api;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod executor;
pub mod maintenance;
pub mod metrics;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod timers;
