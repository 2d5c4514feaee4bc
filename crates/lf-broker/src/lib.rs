//! Durable task broker: submit work from request handlers, run it on a
//! bounded worker pool, poll its state without blocking the event loop.

pub mod broker;
pub mod cancel;
pub mod task;

pub use broker::{JobContext, TaskBroker, WaitOutcome};
pub use cancel::CancelToken;
pub use task::{TaskRecord, TaskState, TaskStore};
