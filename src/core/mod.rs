//! Core types for the task engine

pub mod cancellation;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod task;

pub use cancellation::{CancellationReason, CancellationToken};
pub use envelope::ResultEnvelope;
pub use error::{EngineError, ErrorCode, Result};
pub use handler::{EngineEvent, HandlerRegistry, HandlerToken};
pub(crate) use task::QueuedTask;
pub use task::{GroupId, TaskBuilder, TaskDescriptor, TaskHandle, TaskState};
