//! # Task Engine
//!
//! An asynchronous task execution engine: a resizable pool of worker threads
//! executing opaque units of work, delivering every outcome through a uniform
//! success/error envelope, and grouping related tasks for bulk wait and
//! cancel.
//!
//! ## Features
//!
//! - **Result Envelopes**: every task resolves exactly once with a payload or an error code
//! - **Task Groups**: wait for or cancel every outstanding task sharing a group id
//! - **Resizable Pool**: grow or shrink the worker count at runtime without interrupting work
//! - **Panic Isolation**: a panicking work body becomes an `InternalFailure` envelope
//! - **Graceful Shutdown**: drain queued work, or resolve it with `Shutdown` without running it
//! - **Process-wide Instance**: explicit `init`/`teardown` lifecycle in [`global`]
//!
//! ## Quick Start
//!
//! ```rust
//! use task_engine::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let engine = TaskEngine::new(EngineConfig::new(4))?;
//! engine.start()?;
//!
//! let group = GroupId::new(1);
//! for i in 0..10u32 {
//!     engine.submit_task(
//!         group,
//!         move |_token| ResultEnvelope::make_success(i * 2),
//!         |envelope| println!("result: {:?}", envelope.payload()),
//!     )?;
//! }
//!
//! assert!(engine.wait_group(group, None));
//! engine.shutdown(true)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Cooperative Cancellation
//!
//! ```rust
//! use task_engine::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> Result<()> {
//! let engine = TaskEngine::with_threads(1)?;
//! let group = GroupId::new(42);
//!
//! // Queued before start, so cancelling the group resolves it without running.
//! let (_handle, rx) = engine.submit_with_receiver(group, |token| {
//!     while !token.is_cancelled() {
//!         std::thread::sleep(Duration::from_millis(1));
//!     }
//!     ResultEnvelope::<()>::make_error(ErrorCode::Cancelled, "stopped")
//! })?;
//!
//! assert_eq!(engine.cancel_group(group), 1);
//! assert_eq!(rx.recv().unwrap().code(), ErrorCode::Cancelled);
//! # Ok(())
//! # }
//! ```
//!
//! ## Pool Statistics
//!
//! ```rust
//! use task_engine::prelude::*;
//!
//! # fn main() -> Result<()> {
//! # let engine = TaskEngine::with_threads(2)?;
//! # engine.start()?;
//! # for _ in 0..10 {
//! #     engine.submit(TaskDescriptor::new(|_| ResultEnvelope::make_success(())))?;
//! # }
//! # engine.wait_idle(None);
//! let stats = engine.stats();
//! println!("{} threads, {} tasks completed", stats.active_threads, stats.totals.tasks_completed);
//! # engine.shutdown(true)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod engine;
pub mod global;
#[cfg(feature = "tracing")]
pub mod metrics;
pub mod pool;
pub mod prelude;
pub mod queue;

pub use crate::core::{
    CancellationReason, CancellationToken, EngineError, EngineEvent, ErrorCode, GroupId,
    HandlerRegistry, HandlerToken, Result, ResultEnvelope, TaskBuilder, TaskDescriptor,
    TaskHandle, TaskState,
};
pub use engine::TaskEngine;
pub use pool::{AffinityPolicy, EngineConfig, PoolPhase, PoolStats, MAX_THREADS};
