//! Task engine facade
//!
//! [`TaskEngine`] wires the queue, the group registry, the completion
//! dispatcher and the worker pool together. Submission errors are returned
//! synchronously; every other outcome reaches the caller through the task's
//! completion routine as a [`ResultEnvelope`].

use crate::core::{
    CancellationReason, CancellationToken, EngineEvent, ErrorCode, GroupId, HandlerRegistry,
    Result, ResultEnvelope, TaskDescriptor, TaskHandle,
};
use crate::pool::dispatch::CompletionDispatcher;
use crate::pool::{EngineConfig, PoolPhase, PoolStats, WorkerPool};
use crate::queue::{GroupRegistry, TaskQueue};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::Duration;

/// Asynchronous task execution engine
///
/// # Example
///
/// ```rust
/// use task_engine::{EngineConfig, GroupId, ResultEnvelope, TaskEngine};
///
/// # fn main() -> task_engine::Result<()> {
/// let engine = TaskEngine::new(EngineConfig::new(2))?;
/// engine.start()?;
///
/// let (_handle, rx) = engine.submit_with_receiver(GroupId::new(7), |_token| {
///     ResultEnvelope::make_success("profile loaded".to_string())
/// })?;
/// assert!(engine.wait_group(GroupId::new(7), None));
/// assert_eq!(rx.recv().unwrap().into_payload()?, "profile loaded");
///
/// engine.shutdown(true)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TaskEngine {
    queue: Arc<TaskQueue>,
    registry: Arc<GroupRegistry>,
    dispatcher: Arc<CompletionDispatcher>,
    events: Arc<HandlerRegistry<EngineEvent>>,
    pool: WorkerPool,
}

impl TaskEngine {
    /// Create a stopped engine. Tasks may be queued before `start`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the configuration does not validate.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_events(config, Arc::new(HandlerRegistry::new()))
    }

    /// Create an engine publishing to an existing event registry
    pub fn with_events(
        config: EngineConfig,
        events: Arc<HandlerRegistry<EngineEvent>>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(GroupRegistry::new());
        let queue = Arc::new(TaskQueue::new(Arc::clone(&registry)));
        let dispatcher = Arc::new(CompletionDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&events),
        ));
        let pool = WorkerPool::new(
            config,
            Arc::clone(&queue),
            Arc::clone(&dispatcher),
            Arc::clone(&events),
        );

        Ok(Self {
            queue,
            registry,
            dispatcher,
            events,
            pool,
        })
    }

    /// Create an engine with `threads` initial workers (0 = number of CPUs)
    pub fn with_threads(threads: usize) -> Result<Self> {
        Self::new(EngineConfig::new(threads))
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        self.pool.config()
    }

    /// Spawn the initial workers
    pub fn start(&self) -> Result<()> {
        self.pool.start()
    }

    /// Whether workers are running
    pub fn is_running(&self) -> bool {
        self.pool.phase() == PoolPhase::Running
    }

    /// Lifecycle phase of the worker pool
    pub fn phase(&self) -> PoolPhase {
        self.pool.phase()
    }

    /// Queue a task.
    ///
    /// # Errors
    ///
    /// `QueueShutdown` once shutdown has begun. The completion routine of a
    /// rejected task never runs.
    pub fn submit<T: Send + 'static>(&self, descriptor: TaskDescriptor<T>) -> Result<TaskHandle> {
        let (task, handle) = descriptor.into_queued();
        self.queue.submit(task)?;
        Ok(handle)
    }

    /// Queue a work body with a completion routine in `group`
    pub fn submit_task<T, W, C>(
        &self,
        group: impl Into<GroupId>,
        work: W,
        completion: C,
    ) -> Result<TaskHandle>
    where
        T: Send + 'static,
        W: FnOnce(&CancellationToken) -> ResultEnvelope<T> + Send + 'static,
        C: FnOnce(ResultEnvelope<T>) + Send + 'static,
    {
        self.submit(
            TaskDescriptor::new(work)
                .in_group(group)
                .on_complete(completion),
        )
    }

    /// Queue a work body and receive its envelope on a channel.
    ///
    /// Exactly one envelope is sent.
    pub fn submit_with_receiver<T, W>(
        &self,
        group: impl Into<GroupId>,
        work: W,
    ) -> Result<(TaskHandle, Receiver<ResultEnvelope<T>>)>
    where
        T: Send + 'static,
        W: FnOnce(&CancellationToken) -> ResultEnvelope<T> + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let handle = self.submit_task(group, work, move |envelope| {
            let _ = tx.send(envelope);
        })?;
        Ok((handle, rx))
    }

    /// Queue a work body and await its envelope
    #[cfg(feature = "async")]
    pub fn submit_async<T, W>(
        &self,
        group: impl Into<GroupId>,
        work: W,
    ) -> Result<impl std::future::Future<Output = ResultEnvelope<T>> + Send>
    where
        T: Send + 'static,
        W: FnOnce(&CancellationToken) -> ResultEnvelope<T> + Send + 'static,
    {
        use futures::FutureExt;

        let (tx, rx) = futures::channel::oneshot::channel();
        self.submit_task(group, work, move |envelope| {
            let _ = tx.send(envelope);
        })?;
        Ok(rx.map(|received| {
            received.unwrap_or_else(|_| {
                ResultEnvelope::make_error(ErrorCode::InternalFailure, "completion channel closed")
            })
        }))
    }

    /// Cancel every outstanding task of `group`.
    ///
    /// Queued members are resolved with `Cancelled` on this thread and never
    /// run. Running members have their token flagged. Returns how many
    /// queued tasks were removed. `GroupId::UNGROUPED` is a no-op.
    pub fn cancel_group(&self, group: impl Into<GroupId>) -> usize {
        let group = group.into();
        let removed = self.queue.cancel_group(group);
        let count = removed.len();

        #[cfg(feature = "tracing")]
        crate::metrics::record_group_cancel(group, count);

        for task in removed {
            task.token
                .cancel_with_reason(CancellationReason::GroupCancelled(group));
            self.dispatcher.resolve(
                task,
                ErrorCode::Cancelled,
                format!("group {} cancelled", group),
            );
        }
        count
    }

    /// Block until `group` has no outstanding task or `timeout` elapses.
    ///
    /// Returns `true` if the group drained. `None` waits forever.
    pub fn wait_group(&self, group: impl Into<GroupId>, timeout: Option<Duration>) -> bool {
        self.registry.wait_group(group.into(), timeout)
    }

    /// Block until no task is outstanding or `timeout` elapses
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        self.registry.wait_idle(timeout)
    }

    /// Outstanding (queued or running) tasks in `group`
    pub fn outstanding_count(&self, group: impl Into<GroupId>) -> usize {
        self.registry.outstanding_count(group.into())
    }

    /// Tasks waiting in the queue
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// See [`WorkerPool::set_target_thread_count`]
    pub fn set_target_thread_count(&self, threads: usize) -> Result<usize> {
        self.pool.set_target_thread_count(threads)
    }

    /// See [`WorkerPool::set_thread_affinity`]
    pub fn set_thread_affinity(&self, slot: usize, core: usize) -> Result<()> {
        self.pool.set_thread_affinity(slot, core)
    }

    /// Live worker threads
    pub fn get_active_thread_count(&self) -> usize {
        self.pool.get_active_thread_count()
    }

    /// Aggregate pool statistics
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// See [`WorkerPool::shutdown`]
    pub fn shutdown(&self, drain: bool) -> Result<()> {
        self.pool.shutdown(drain)
    }

    /// Engine event handlers
    pub fn events(&self) -> &Arc<HandlerRegistry<EngineEvent>> {
        &self.events
    }
}
