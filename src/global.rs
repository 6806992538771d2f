//! Process-wide engine instance
//!
//! The instance is created only by [`init`] and destroyed only by
//! [`teardown`]. Every other call made before `init` or after `teardown`
//! fails with [`EngineError::NotInitialized`]. A torn-down engine is never
//! recreated implicitly.
//!
//! ```rust
//! use task_engine::{global, EngineConfig, EngineError, GroupId, ResultEnvelope};
//!
//! # fn main() -> task_engine::Result<()> {
//! global::init(EngineConfig::new(2))?;
//! global::start()?;
//!
//! global::submit_task(GroupId::new(1), |_| ResultEnvelope::make_success(()), |_| {})?;
//! assert!(global::wait_group(GroupId::new(1), global::INFINITE_TIMEOUT)?);
//!
//! global::teardown()?;
//! assert!(matches!(global::start(), Err(EngineError::NotInitialized)));
//! # Ok(())
//! # }
//! ```

use crate::core::{
    CancellationToken, EngineError, EngineEvent, GroupId, HandlerToken, Result, ResultEnvelope,
    TaskDescriptor, TaskHandle,
};
use crate::engine::TaskEngine;
use crate::pool::{EngineConfig, PoolPhase};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// `wait_group` timeout meaning "wait until the group drains"
pub const INFINITE_TIMEOUT: u64 = u64::MAX;

enum GlobalState {
    Uninitialized,
    Ready(Arc<TaskEngine>),
    TornDown,
}

static ENGINE: RwLock<GlobalState> = parking_lot::const_rwlock(GlobalState::Uninitialized);

/// The current engine, if initialized
pub fn engine() -> Result<Arc<TaskEngine>> {
    match &*ENGINE.read() {
        GlobalState::Ready(engine) => Ok(Arc::clone(engine)),
        GlobalState::Uninitialized | GlobalState::TornDown => Err(EngineError::NotInitialized),
    }
}

/// Whether [`init`] has run and [`teardown`] has not
pub fn is_initialized() -> bool {
    matches!(&*ENGINE.read(), GlobalState::Ready(_))
}

/// Create the process-wide engine, stopped.
///
/// Allowed again after [`teardown`].
///
/// # Errors
///
/// `InvalidState` if an engine is already initialized, or the
/// configuration's validation error.
pub fn init(config: EngineConfig) -> Result<()> {
    let mut state = ENGINE.write();
    if let GlobalState::Ready(_) = &*state {
        return Err(EngineError::invalid_state("engine already initialized"));
    }
    let engine = TaskEngine::new(config)?;
    *state = GlobalState::Ready(Arc::new(engine));
    log::debug!("global task engine initialized");
    Ok(())
}

/// Drain and shut down the engine, then forget it.
///
/// Calling it when no engine is initialized does nothing.
pub fn teardown() -> Result<()> {
    let previous = {
        let mut state = ENGINE.write();
        match std::mem::replace(&mut *state, GlobalState::TornDown) {
            GlobalState::Ready(engine) => engine,
            other => {
                *state = other;
                return Ok(());
            }
        }
    };
    // Shut down outside the lock: draining runs completion routines that
    // may call back into this module.
    let result = previous.shutdown(true);
    log::debug!("global task engine torn down");
    result
}

/// Replace the thread configuration of an initialized engine.
///
/// Registered handlers are kept.
///
/// # Errors
///
/// `InvalidState` once the engine has started or holds queued tasks.
pub fn configure(initial_threads: usize, max_threads: usize) -> Result<()> {
    let mut state = ENGINE.write();
    let GlobalState::Ready(current) = &*state else {
        return Err(EngineError::NotInitialized);
    };
    if current.phase() != PoolPhase::Configured || current.pending_count() > 0 {
        return Err(EngineError::invalid_state(
            "configure is only allowed before start",
        ));
    }
    let previous = current.config();
    let config = EngineConfig::with_limits(initial_threads, max_threads)
        .with_thread_name_prefix(previous.thread_name_prefix.clone())
        .with_affinity(previous.affinity.clone());
    let replacement = TaskEngine::with_events(config, Arc::clone(current.events()))?;
    let replaced = std::mem::replace(&mut *state, GlobalState::Ready(Arc::new(replacement)));
    drop(state);
    drop(replaced);
    Ok(())
}

/// Start the engine's workers
pub fn start() -> Result<()> {
    engine()?.start()
}

/// Queue a descriptor
pub fn submit<T: Send + 'static>(descriptor: TaskDescriptor<T>) -> Result<TaskHandle> {
    engine()?.submit(descriptor)
}

/// Queue a work body with a completion routine in `group`
pub fn submit_task<T, W, C>(group: impl Into<GroupId>, work: W, completion: C) -> Result<TaskHandle>
where
    T: Send + 'static,
    W: FnOnce(&CancellationToken) -> ResultEnvelope<T> + Send + 'static,
    C: FnOnce(ResultEnvelope<T>) + Send + 'static,
{
    engine()?.submit_task(group, work, completion)
}

/// Cancel a group; returns how many queued tasks were removed
pub fn cancel_group(group: impl Into<GroupId>) -> Result<usize> {
    Ok(engine()?.cancel_group(group))
}

/// Wait up to `timeout_ms` milliseconds for `group` to drain.
///
/// [`INFINITE_TIMEOUT`] waits without limit. Returns whether the group
/// drained.
pub fn wait_group(group: impl Into<GroupId>, timeout_ms: u64) -> Result<bool> {
    let engine = engine()?;
    let timeout = (timeout_ms != INFINITE_TIMEOUT).then(|| Duration::from_millis(timeout_ms));
    Ok(engine.wait_group(group, timeout))
}

/// Resize the pool; returns the effective target
pub fn set_target_thread_count(threads: usize) -> Result<usize> {
    engine()?.set_target_thread_count(threads)
}

/// Live worker threads
pub fn get_active_thread_count() -> Result<usize> {
    Ok(engine()?.get_active_thread_count())
}

/// Shut the engine down without forgetting it.
///
/// Later submissions fail with `QueueShutdown` until [`teardown`].
pub fn shutdown(drain: bool) -> Result<()> {
    engine()?.shutdown(drain)
}

/// Register a handler for engine events
pub fn add_handler<F>(handler: F) -> Result<HandlerToken>
where
    F: Fn(&EngineEvent) + Send + Sync + 'static,
{
    Ok(engine()?.events().add_handler(handler))
}

/// Remove a handler. Removing it twice is not an error; the second call
/// returns `Ok(false)`.
pub fn remove_handler(token: HandlerToken) -> Result<bool> {
    Ok(engine()?.events().remove_handler(token))
}
