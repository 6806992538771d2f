//! Resizable worker pool

use crate::core::{
    CancellationReason, EngineError, EngineEvent, ErrorCode, HandlerRegistry, Result,
};
use crate::pool::config::EngineConfig;
use crate::pool::dispatch::CompletionDispatcher;
use crate::pool::worker::{Worker, WorkerState, WorkerStats, WorkerStatsSnapshot};
use crate::queue::TaskQueue;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::thread;

/// Lifecycle phase of a [`WorkerPool`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PoolPhase {
    /// Created, not started
    Configured,
    /// Workers are running
    Running,
    /// Shut down; cannot be restarted
    ShutDown,
}

/// Aggregate pool statistics
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Lifecycle phase
    pub phase: PoolPhase,
    /// Requested thread count after clamping
    pub target_threads: usize,
    /// Live worker threads
    pub active_threads: usize,
    /// Workers currently executing a task
    pub busy_threads: usize,
    /// Tasks waiting in the queue
    pub queued_tasks: usize,
    /// Tasks submitted but not yet dispatched
    pub outstanding_tasks: usize,
    /// Counters summed over every worker that ever ran, including the
    /// calling thread when it drained the queue at shutdown
    pub totals: WorkerStatsSnapshot,
}

#[derive(Debug)]
struct WorkerSet {
    workers: Vec<Worker>,
    slot_affinity: HashMap<usize, usize>,
    target: usize,
    phase: PoolPhase,
    retired: WorkerStatsSnapshot,
}

/// A pool of worker threads fed by a shared [`TaskQueue`].
///
/// Resize, start and shutdown are serialized by the worker-set lock. Worker
/// threads never take that lock, so completion routines and event handlers
/// may call back into the pool.
#[derive(Debug)]
pub struct WorkerPool {
    config: EngineConfig,
    queue: Arc<TaskQueue>,
    dispatcher: Arc<CompletionDispatcher>,
    events: Arc<HandlerRegistry<EngineEvent>>,
    workers: Mutex<WorkerSet>,
}

impl WorkerPool {
    pub(crate) fn new(
        config: EngineConfig,
        queue: Arc<TaskQueue>,
        dispatcher: Arc<CompletionDispatcher>,
        events: Arc<HandlerRegistry<EngineEvent>>,
    ) -> Self {
        let target = config.clamp_threads(config.initial_threads);
        Self {
            config,
            queue,
            dispatcher,
            events,
            workers: Mutex::new(WorkerSet {
                workers: Vec::new(),
                slot_affinity: HashMap::new(),
                target,
                phase: PoolPhase::Configured,
                retired: WorkerStatsSnapshot::default(),
            }),
        }
    }

    /// Pool configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> PoolPhase {
        self.workers.lock().phase
    }

    /// Spawn the configured number of workers.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if started, `Shutdown` after shutdown, `SpawnError`
    /// if a thread could not be created.
    pub fn start(&self) -> Result<()> {
        let mut set = self.workers.lock();
        match set.phase {
            PoolPhase::Running => {
                return Err(EngineError::already_running(
                    &self.config.thread_name_prefix,
                    self.queue.live_workers(),
                ))
            }
            PoolPhase::ShutDown => {
                return Err(EngineError::shutdown(&self.config.thread_name_prefix))
            }
            PoolPhase::Configured => {}
        }

        let to_spawn = self.queue.rebalance(set.target);
        self.spawn_workers(&mut set, to_spawn)?;
        set.phase = PoolPhase::Running;

        log::info!(
            "worker pool '{}' started with {} threads",
            self.config.thread_name_prefix,
            set.workers.len()
        );
        #[cfg(feature = "tracing")]
        crate::metrics::record_pool_start(set.workers.len(), self.config.ceiling());
        Ok(())
    }

    /// Move the live thread count toward `requested`.
    ///
    /// Values above the ceiling are clamped and logged. Growing spawns idle
    /// workers immediately; shrinking lets excess workers exit after their
    /// current task. Queued work is untouched. Before `start` this only
    /// records the target. Returns the effective target.
    pub fn set_target_thread_count(&self, requested: usize) -> Result<usize> {
        let target = self.config.clamp_threads(requested);
        let mut set = self.workers.lock();
        match set.phase {
            PoolPhase::ShutDown => {
                return Err(EngineError::shutdown(&self.config.thread_name_prefix))
            }
            PoolPhase::Configured => {
                set.target = target;
                return Ok(target);
            }
            PoolPhase::Running => {}
        }

        Self::reap_finished(&mut set);
        let to_spawn = self.queue.rebalance(target);
        let spawned = self.spawn_workers(&mut set, to_spawn);
        set.target = target;
        drop(set);
        spawned?;

        log::debug!("worker pool target set to {} ({} spawned)", target, to_spawn);
        #[cfg(feature = "tracing")]
        crate::metrics::record_pool_resize(target, to_spawn);
        self.events.notify(&EngineEvent::PoolResized { target });
        Ok(target)
    }

    /// Live worker threads
    pub fn get_active_thread_count(&self) -> usize {
        self.queue.live_workers()
    }

    /// Prefer `core` for the worker in `slot`.
    ///
    /// Applied by that worker before its next task, and by any worker later
    /// spawned into the slot. Failure to pin is logged by the worker.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` if `slot` is not below the thread ceiling.
    pub fn set_thread_affinity(&self, slot: usize, core: usize) -> Result<()> {
        let ceiling = self.config.ceiling();
        if slot >= ceiling {
            return Err(EngineError::resource_exhausted(slot + 1, ceiling));
        }
        let mut set = self.workers.lock();
        set.slot_affinity.insert(slot, core);
        if let Some(worker) = set.workers.iter().find(|w| w.slot() == slot && !w.is_finished()) {
            worker.set_affinity(Some(core));
        }
        Ok(())
    }

    /// Stop the pool.
    ///
    /// With `drain`, queued tasks still run: by the workers, or by the
    /// calling thread when the pool has none or the caller is itself one of
    /// the pool's workers. Without it, queued tasks are resolved with
    /// `Shutdown` on the calling thread and never run, and running tasks see
    /// their token cancelled.
    ///
    /// No pool lock is held while completion routines run, so they may call
    /// back into the pool. Running tasks always finish and every other worker
    /// is joined before this returns. Calling it again is a no-op.
    pub fn shutdown(&self, drain: bool) -> Result<()> {
        let current = thread::current().id();
        let (workers, discarded) = {
            let mut set = self.workers.lock();
            if set.phase == PoolPhase::ShutDown {
                return Ok(());
            }
            set.phase = PoolPhase::ShutDown;

            self.queue.close();
            self.queue.cancel_retires();
            let discarded = if drain {
                Vec::new()
            } else {
                self.queue.drain_pending()
            };
            (std::mem::take(&mut set.workers), discarded)
        };

        let mut inline = WorkerStatsSnapshot::default();
        if drain {
            let caller_is_worker = workers.iter().any(|w| w.thread_id() == Some(current));
            if caller_is_worker || self.queue.live_workers() == 0 {
                let stats = WorkerStats::new();
                while let Some(task) = self.queue.dequeue_next() {
                    self.dispatcher.execute(task, &stats);
                }
                inline = stats.snapshot();
            }
        } else {
            if !discarded.is_empty() {
                log::info!("discarding {} queued tasks at shutdown", discarded.len());
            }
            for task in discarded {
                self.dispatcher.resolve(
                    task,
                    ErrorCode::Shutdown,
                    "engine shut down before the task ran".to_string(),
                );
            }
            let flagged = self
                .queue
                .registry()
                .cancel_running(CancellationReason::Shutdown);
            if flagged > 0 {
                log::debug!("flagged {} running tasks for shutdown", flagged);
            }
        }

        self.queue.request_stop();

        let mut first_error = None;
        let mut joined = inline;
        for worker in workers {
            let stats = worker.stats();
            if worker.thread_id() == Some(current) {
                log::warn!(
                    "shutdown called from worker {}, not joining its own thread",
                    worker.slot()
                );
                worker.detach();
            } else if let Err(e) = worker.join() {
                log::error!("{}", e);
                first_error.get_or_insert(e);
            }
            joined.absorb(&stats.snapshot());
        }

        let totals = {
            let mut set = self.workers.lock();
            set.retired.absorb(&joined);
            set.retired
        };

        log::info!(
            "worker pool '{}' shut down: {} completed, {} failed, {} panicked",
            self.config.thread_name_prefix,
            totals.tasks_completed,
            totals.tasks_failed,
            totals.tasks_panicked
        );
        #[cfg(feature = "tracing")]
        crate::metrics::record_pool_shutdown(
            totals.tasks_completed,
            totals.tasks_failed + totals.tasks_panicked,
        );
        self.events.notify(&EngineEvent::ShutdownCompleted { drained: drain });

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Aggregate statistics
    pub fn stats(&self) -> PoolStats {
        let set = self.workers.lock();
        let mut totals = set.retired;
        let mut busy_threads = 0;
        for worker in &set.workers {
            let stats = worker.stats();
            if stats.state() == WorkerState::Busy {
                busy_threads += 1;
            }
            totals.absorb(&stats.snapshot());
        }
        PoolStats {
            phase: set.phase,
            target_threads: set.target,
            active_threads: self.queue.live_workers(),
            busy_threads,
            queued_tasks: self.queue.len(),
            outstanding_tasks: self.queue.registry().total_outstanding(),
            totals,
        }
    }

    /// Join workers that already left their run loop and fold their stats
    fn reap_finished(set: &mut WorkerSet) {
        let (finished, live): (Vec<_>, Vec<_>) =
            std::mem::take(&mut set.workers).into_iter().partition(|w| w.is_finished());
        set.workers = live;
        for worker in finished {
            set.retired.absorb(&worker.stats().snapshot());
            if let Err(e) = worker.join() {
                log::error!("{}", e);
            }
        }
    }

    /// Spawn `count` workers whose slots were reserved with `rebalance`
    fn spawn_workers(&self, set: &mut WorkerSet, count: usize) -> Result<()> {
        let mut used: BTreeSet<usize> = set.workers.iter().map(|w| w.slot()).collect();
        for spawned in 0..count {
            let slot = (0..).find(|s| !used.contains(s)).unwrap_or(used.len());
            let core = set
                .slot_affinity
                .get(&slot)
                .copied()
                .or_else(|| self.config.affinity.core_for(slot));

            match Worker::spawn(
                slot,
                &self.config.thread_name_prefix,
                core,
                Arc::clone(&self.queue),
                Arc::clone(&self.dispatcher),
            ) {
                Ok(worker) => {
                    used.insert(slot);
                    set.workers.push(worker);
                }
                Err(e) => {
                    self.queue.release_reserved(count - spawned);
                    log::error!("{}", e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let phase = self.phase();
        if phase == PoolPhase::Running || (phase == PoolPhase::Configured && !self.queue.is_empty()) {
            if let Err(e) = self.shutdown(true) {
                log::error!(
                    "failed to shut down worker pool '{}' during drop: {}",
                    self.config.thread_name_prefix,
                    e
                );
            }
        }
    }
}
