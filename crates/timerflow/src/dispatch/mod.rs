pub mod registry;
pub mod runner;
pub mod worker;

pub use registry::{
    boxed, parse_payload, BoxFuture, Handler, HandlerOptions, HandlerRegistry, TaskContext,
    TaskError,
};
pub use runner::{Completion, TaskRunner};
pub use worker::{Dispatcher, DispatcherConfig};
