//! Task queue and worker signalling.
//!
//! A single FIFO of pending tasks guarded by one lock. The same lock guards
//! the three signals workers react to: work available, stop requested and
//! retire requested. Keeping them together means a worker can never miss a
//! wake-up between checking the queue and going to sleep.
//!
//! Lock order is always queue, then [`GroupRegistry`].

mod registry;

pub use registry::GroupRegistry;

use crate::core::{EngineError, GroupId, QueuedTask, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// What a worker should do next
#[derive(Debug)]
pub(crate) enum WorkerSignal {
    /// Execute this task
    Task(QueuedTask),
    /// The pool shrank; exit after the current task
    Retire,
    /// Stop requested and the queue is empty; exit
    Stop,
}

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<QueuedTask>,
    accepting: bool,
    stop_requested: bool,
    retire_requests: usize,
    live_workers: usize,
}

/// Thread-safe FIFO of pending tasks
#[derive(Debug)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    work_available: Condvar,
    registry: Arc<GroupRegistry>,
}

impl TaskQueue {
    /// Create an open queue that registers tasks with `registry`
    pub fn new(registry: Arc<GroupRegistry>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                accepting: true,
                stop_requested: false,
                retire_requests: 0,
                live_workers: 0,
            }),
            work_available: Condvar::new(),
            registry,
        }
    }

    /// The registry tasks are registered with
    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    /// Append a task and wake one worker.
    ///
    /// # Errors
    ///
    /// `QueueShutdown` once the queue is closed. The rejected task is
    /// discarded without running its completion routine.
    pub(crate) fn submit(&self, mut task: QueuedTask) -> Result<()> {
        let mut state = self.state.lock();
        if !state.accepting {
            let pending = state.pending.len();
            drop(state);
            task.body.disarm();
            return Err(EngineError::queue_shutdown(pending));
        }

        self.registry.register(task.group, task.id);
        state.pending.push_back(task);

        #[cfg(feature = "tracing")]
        crate::metrics::record_submission(state.pending.len());

        drop(state);
        self.work_available.notify_one();
        Ok(())
    }

    /// Remove and return the head of the queue, if any
    pub(crate) fn dequeue_next(&self) -> Option<QueuedTask> {
        let mut state = self.state.lock();
        self.pop_front(&mut state)
    }

    fn pop_front(&self, state: &mut QueueState) -> Option<QueuedTask> {
        let task = state.pending.pop_front()?;
        // Registered as running before the lock drops, so a concurrent group
        // cancel either removes the task here or flags it.
        self.registry.mark_running(task.group, task.id, &task.token);
        Some(task)
    }

    /// Block until there is something for a worker to do.
    ///
    /// A worker receiving `Retire` or `Stop` is no longer counted as live.
    pub(crate) fn next_for_worker(&self) -> WorkerSignal {
        let mut state = self.state.lock();
        loop {
            if state.retire_requests > 0 {
                state.retire_requests -= 1;
                state.live_workers = state.live_workers.saturating_sub(1);
                return WorkerSignal::Retire;
            }
            if let Some(task) = self.pop_front(&mut state) {
                return WorkerSignal::Task(task);
            }
            if state.stop_requested {
                state.live_workers = state.live_workers.saturating_sub(1);
                return WorkerSignal::Stop;
            }
            self.work_available.wait(&mut state);
        }
    }

    /// Move the live worker count toward `target`.
    ///
    /// Shrinking posts retire requests. Growing first withdraws outstanding
    /// retire requests, then reserves slots for new workers and returns how
    /// many the caller must spawn.
    pub(crate) fn rebalance(&self, target: usize) -> usize {
        let mut state = self.state.lock();
        let effective = state.live_workers.saturating_sub(state.retire_requests);
        if target > effective {
            let needed = target - effective;
            let withdrawn = needed.min(state.retire_requests);
            state.retire_requests -= withdrawn;
            let to_spawn = needed - withdrawn;
            state.live_workers += to_spawn;
            to_spawn
        } else {
            if target < effective {
                state.retire_requests += effective - target;
                drop(state);
                self.work_available.notify_all();
            }
            0
        }
    }

    /// Give back slots reserved by `rebalance` whose threads never started
    pub(crate) fn release_reserved(&self, count: usize) {
        let mut state = self.state.lock();
        state.live_workers = state.live_workers.saturating_sub(count);
    }

    /// Live workers, excluding those that already took a retire or stop signal
    pub fn live_workers(&self) -> usize {
        self.state.lock().live_workers
    }

    /// Remove every queued member of `group` and flag its running members.
    ///
    /// The removed tasks are returned unresolved; the caller dispatches their
    /// `Cancelled` envelopes outside the lock.
    pub(crate) fn cancel_group(&self, group: GroupId) -> Vec<QueuedTask> {
        if group.is_ungrouped() {
            return Vec::new();
        }
        let mut state = self.state.lock();
        let (cancelled, kept): (VecDeque<_>, VecDeque<_>) =
            state.pending.drain(..).partition(|task| task.group == group);
        state.pending = kept;
        self.registry.cancel_all(group);
        cancelled.into()
    }

    /// Stop accepting submissions
    pub(crate) fn close(&self) {
        self.state.lock().accepting = false;
    }

    /// Whether submissions are still accepted
    pub fn is_accepting(&self) -> bool {
        self.state.lock().accepting
    }

    /// Remove every queued task, in FIFO order
    pub(crate) fn drain_pending(&self) -> Vec<QueuedTask> {
        self.state.lock().pending.drain(..).collect()
    }

    /// Tell every worker to exit once the queue is empty
    pub(crate) fn request_stop(&self) {
        self.state.lock().stop_requested = true;
        self.work_available.notify_all();
    }

    /// Withdraw every outstanding retire request; returns how many
    pub(crate) fn cancel_retires(&self) -> usize {
        let mut state = self.state.lock();
        std::mem::take(&mut state.retire_requests)
    }

    /// Retire requests not yet picked up by a worker
    #[cfg(test)]
    pub(crate) fn pending_retires(&self) -> usize {
        self.state.lock().retire_requests
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }
}
