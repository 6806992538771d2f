//! Worker thread implementation

use crate::core::{EngineError, Result};
use crate::pool::dispatch::{panic_message, CompletionDispatcher};
use crate::queue::{TaskQueue, WorkerSignal};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing::{debug, span, Level};

/// Marker for "no core preference"
pub(crate) const NO_AFFINITY: usize = usize::MAX;

/// What a worker thread is currently doing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    /// Waiting for work
    Idle,
    /// Executing a task
    Busy,
    /// Thread has left its run loop
    Exited,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Idle,
            1 => WorkerState::Busy,
            _ => WorkerState::Exited,
        }
    }
}

/// Statistics for a worker thread
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Tasks whose work body returned a success envelope
    pub tasks_completed: AtomicU64,
    /// Tasks whose work body returned an error envelope
    pub tasks_failed: AtomicU64,
    /// Tasks whose work body panicked
    pub tasks_panicked: AtomicU64,
    /// Tasks resolved `Cancelled` without running
    pub tasks_cancelled: AtomicU64,
    /// Total time spent in work bodies (microseconds)
    pub busy_time_us: AtomicU64,
    state: AtomicU8,
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    /// Tasks whose work body returned a success envelope
    pub tasks_completed: u64,
    /// Tasks whose work body returned an error envelope
    pub tasks_failed: u64,
    /// Tasks whose work body panicked
    pub tasks_panicked: u64,
    /// Tasks resolved `Cancelled` without running
    pub tasks_cancelled: u64,
    /// Total time spent in work bodies (microseconds)
    pub busy_time_us: u64,
}

impl WorkerStatsSnapshot {
    /// Add another snapshot's counters to this one
    pub fn absorb(&mut self, other: &WorkerStatsSnapshot) {
        self.tasks_completed += other.tasks_completed;
        self.tasks_failed += other.tasks_failed;
        self.tasks_panicked += other.tasks_panicked;
        self.tasks_cancelled += other.tasks_cancelled;
        self.busy_time_us += other.busy_time_us;
    }

    /// Tasks whose completion routine was dispatched by a worker
    pub fn tasks_dispatched(&self) -> u64 {
        self.tasks_completed + self.tasks_failed + self.tasks_panicked + self.tasks_cancelled
    }
}

impl WorkerStats {
    /// Create new worker statistics
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn increment_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_panicked(&self) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_cancelled(&self) {
        self.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_busy_time(&self, microseconds: u64) {
        self.busy_time_us.fetch_add(microseconds, Ordering::Relaxed);
    }

    /// Current worker state
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Copy the counters
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
            busy_time_us: self.busy_time_us.load(Ordering::Relaxed),
        }
    }
}

/// Pin the calling thread to `core`. Failure is logged, never fatal.
fn pin_current_thread(slot: usize, core: usize) {
    let cores = match core_affinity::get_core_ids() {
        Some(v) if !v.is_empty() => v,
        _ => {
            log::warn!("failed to get core ids for worker {}, skipping affinity", slot);
            return;
        }
    };
    let Some(core_id) = cores.into_iter().find(|c| c.id == core) else {
        log::warn!("worker {}: core {} does not exist, skipping affinity", slot, core);
        return;
    };
    if !core_affinity::set_for_current(core_id) {
        log::warn!("failed to pin worker {} to core {}", slot, core);
    }
}

/// A worker thread that executes tasks from the shared queue
#[derive(Debug)]
pub struct Worker {
    slot: usize,
    thread: Option<thread::JoinHandle<()>>,
    stats: Arc<WorkerStats>,
    affinity: Arc<AtomicUsize>,
}

impl Worker {
    /// Spawn a worker thread for `slot`.
    ///
    /// The caller must already have reserved the slot with the queue's
    /// `rebalance`. The worker exits on a retire signal, or once stop is
    /// requested and the queue is empty.
    pub(crate) fn spawn(
        slot: usize,
        name_prefix: &str,
        core: Option<usize>,
        queue: Arc<TaskQueue>,
        dispatcher: Arc<CompletionDispatcher>,
    ) -> Result<Self> {
        let stats = Arc::new(WorkerStats::new());
        let affinity = Arc::new(AtomicUsize::new(core.unwrap_or(NO_AFFINITY)));
        let stats_clone = Arc::clone(&stats);
        let affinity_clone = Arc::clone(&affinity);

        let thread = thread::Builder::new()
            .name(format!("{}-{}", name_prefix, slot))
            .spawn(move || {
                Self::run(slot, queue, dispatcher, stats_clone, affinity_clone);
            })
            .map_err(|e| EngineError::spawn_with_source(slot, "failed to spawn worker thread", e))?;

        Ok(Self {
            slot,
            thread: Some(thread),
            stats,
            affinity,
        })
    }

    /// Worker slot index
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Get worker statistics
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Change the preferred core, applied before the next task
    pub(crate) fn set_affinity(&self, core: Option<usize>) {
        self.affinity
            .store(core.unwrap_or(NO_AFFINITY), Ordering::Release);
    }

    /// Whether the thread has returned from its run loop
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    pub(crate) fn thread_id(&self) -> Option<thread::ThreadId> {
        self.thread.as_ref().map(|t| t.thread().id())
    }

    /// Let the thread finish on its own without waiting for it
    pub(crate) fn detach(mut self) {
        self.thread.take();
    }

    /// Join the worker thread
    pub fn join(mut self) -> Result<()> {
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| EngineError::join(self.slot, "Worker panicked"))?;
        }
        Ok(())
    }

    fn run(
        slot: usize,
        queue: Arc<TaskQueue>,
        dispatcher: Arc<CompletionDispatcher>,
        stats: Arc<WorkerStats>,
        affinity: Arc<AtomicUsize>,
    ) {
        #[cfg(feature = "tracing")]
        let worker_span = span!(Level::DEBUG, "worker", slot = slot);
        #[cfg(feature = "tracing")]
        let _guard = worker_span.enter();

        log::debug!("worker {} started", slot);
        let mut applied = NO_AFFINITY;

        loop {
            match queue.next_for_worker() {
                WorkerSignal::Task(task) => {
                    let wanted = affinity.load(Ordering::Acquire);
                    if wanted != applied && wanted != NO_AFFINITY {
                        pin_current_thread(slot, wanted);
                    }
                    applied = wanted;

                    stats.set_state(WorkerState::Busy);
                    #[cfg(feature = "tracing")]
                    crate::metrics::record_worker_busy(slot);

                    dispatcher.execute(task, &stats);

                    #[cfg(feature = "tracing")]
                    crate::metrics::record_worker_idle(slot);
                    stats.set_state(WorkerState::Idle);
                }
                WorkerSignal::Retire => {
                    log::debug!("worker {} retiring", slot);
                    break;
                }
                WorkerSignal::Stop => {
                    #[cfg(feature = "tracing")]
                    debug!(
                        tasks_completed = stats.snapshot().tasks_completed,
                        tasks_failed = stats.snapshot().tasks_failed,
                        "worker shutting down"
                    );
                    break;
                }
            }
        }

        stats.set_state(WorkerState::Exited);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

            let start = std::time::Instant::now();
            loop {
                if thread.is_finished() {
                    if let Err(panic_info) = thread.join() {
                        log::error!(
                            "worker {} panicked during shutdown: {}",
                            self.slot,
                            panic_message(panic_info.as_ref())
                        );
                    }
                    break;
                }

                if start.elapsed() >= JOIN_TIMEOUT {
                    log::warn!(
                        "worker {} did not finish within {}s during drop, thread may be leaked",
                        self.slot,
                        JOIN_TIMEOUT.as_secs()
                    );
                    break;
                }

                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EngineEvent, HandlerRegistry, ResultEnvelope, TaskDescriptor};
    use crate::queue::GroupRegistry;

    fn fixture() -> (Arc<TaskQueue>, Arc<CompletionDispatcher>) {
        let registry = Arc::new(GroupRegistry::new());
        let events = Arc::new(HandlerRegistry::<EngineEvent>::new());
        let queue = Arc::new(TaskQueue::new(Arc::clone(&registry)));
        let dispatcher = Arc::new(CompletionDispatcher::new(registry, events));
        (queue, dispatcher)
    }

    #[test]
    fn test_worker_creation() {
        let (queue, dispatcher) = fixture();
        assert_eq!(queue.rebalance(1), 1);

        let worker = Worker::spawn(0, "test-worker", None, Arc::clone(&queue), dispatcher)
            .expect("Failed to create worker");
        assert_eq!(worker.slot(), 0);

        queue.request_stop();
        worker.join().expect("Failed to join worker");
        assert_eq!(queue.live_workers(), 0);
    }

    #[test]
    fn test_worker_task_execution() {
        let (queue, dispatcher) = fixture();
        queue.rebalance(1);
        let worker = Worker::spawn(0, "test-worker", None, Arc::clone(&queue), dispatcher)
            .expect("Failed to create worker");
        let stats = worker.stats();

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let (task, _) = TaskDescriptor::new(|_| ResultEnvelope::make_success(()))
            .on_complete(move |_| {
                let _ = done_tx.send(());
            })
            .into_queued();
        queue.submit(task).expect("Failed to submit task");

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("task did not complete");
        queue.request_stop();
        worker.join().expect("Failed to join worker");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.tasks_completed, 1);
        assert_eq!(snapshot.tasks_failed, 0);
        assert_eq!(stats.state(), WorkerState::Exited);
    }

    #[test]
    fn test_worker_survives_panic() {
        let (queue, dispatcher) = fixture();
        queue.rebalance(1);
        let worker = Worker::spawn(0, "test-worker", None, Arc::clone(&queue), dispatcher)
            .expect("Failed to create worker");
        let stats = worker.stats();

        let (panicking, _) =
            TaskDescriptor::<()>::new(|_| panic!("Intentional panic for testing")).into_queued();
        queue.submit(panicking).expect("Failed to submit panicking task");

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let (normal, _) = TaskDescriptor::new(|_| ResultEnvelope::make_success(()))
            .on_complete(move |_| {
                let _ = done_tx.send(());
            })
            .into_queued();
        queue.submit(normal).expect("Failed to submit normal task");

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker stopped after panic");
        queue.request_stop();
        worker.join().expect("Failed to join worker");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.tasks_panicked, 1);
        assert_eq!(snapshot.tasks_completed, 1);
    }

    #[test]
    fn test_worker_retires() {
        let (queue, dispatcher) = fixture();
        queue.rebalance(1);
        let worker = Worker::spawn(3, "test-worker", Some(0), Arc::clone(&queue), dispatcher)
            .expect("Failed to create worker");

        queue.rebalance(0);
        worker.join().expect("Failed to join worker");
        assert_eq!(queue.live_workers(), 0);
        assert_eq!(queue.pending_retires(), 0);
    }

    #[test]
    fn test_snapshot_absorb() {
        let mut total = WorkerStatsSnapshot::default();
        let one = WorkerStatsSnapshot {
            tasks_completed: 2,
            tasks_failed: 1,
            tasks_panicked: 0,
            tasks_cancelled: 1,
            busy_time_us: 10,
        };
        total.absorb(&one);
        total.absorb(&one);
        assert_eq!(total.tasks_dispatched(), 8);
        assert_eq!(total.busy_time_us, 20);
    }
}
