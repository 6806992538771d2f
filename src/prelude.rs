//! Convenient re-exports for common types and traits

pub use crate::core::{
    CancellationToken, EngineError, EngineEvent, ErrorCode, GroupId, Result, ResultEnvelope,
    TaskDescriptor, TaskHandle, TaskState,
};
pub use crate::engine::TaskEngine;
pub use crate::pool::{AffinityPolicy, EngineConfig, PoolStats};
