//! Task execution and completion dispatch
//!
//! Every task leaves the engine through [`CompletionDispatcher::finish`]:
//! completion routine, then lifecycle state, then group bookkeeping. A
//! group therefore only reports drained after its last completion routine
//! has returned.

use crate::core::{
    EngineEvent, ErrorCode, HandlerRegistry, QueuedTask, TaskState,
};
use crate::pool::worker::WorkerStats;
use crate::queue::GroupRegistry;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "tracing")]
use tracing::{debug, span, Level};

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Runs tasks and delivers their envelopes exactly once
#[derive(Debug)]
pub(crate) struct CompletionDispatcher {
    registry: Arc<GroupRegistry>,
    events: Arc<HandlerRegistry<EngineEvent>>,
}

impl CompletionDispatcher {
    pub(crate) fn new(
        registry: Arc<GroupRegistry>,
        events: Arc<HandlerRegistry<EngineEvent>>,
    ) -> Self {
        Self { registry, events }
    }

    /// Execute a dequeued task on the current thread.
    ///
    /// A task whose token was cancelled while queued is resolved with
    /// `Cancelled` and its work body never runs.
    pub(crate) fn execute(&self, mut task: QueuedTask, stats: &WorkerStats) {
        #[cfg(feature = "tracing")]
        let parent = task.span.clone();
        #[cfg(feature = "tracing")]
        let task_span = span!(parent: &parent, Level::DEBUG, "task_execution", task = %task.name, id = task.id);
        #[cfg(feature = "tracing")]
        let _task_guard = task_span.enter();

        if task.token.is_cancelled() {
            let reason = task
                .token
                .reason()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "cancelled".to_string());
            stats.increment_cancelled();
            self.resolve(task, ErrorCode::Cancelled, reason);
            return;
        }

        task.status.set(TaskState::Running);
        let token = task.token.clone();
        let start = Instant::now();

        let outcome = catch_unwind(AssertUnwindSafe(|| task.body.run(&token)));

        let elapsed = start.elapsed();
        stats.add_busy_time(elapsed.as_micros() as u64);

        match outcome {
            Ok(ErrorCode::Success) => {
                stats.increment_completed();
                #[cfg(feature = "tracing")]
                {
                    debug!(duration_ms = elapsed.as_millis() as u64, "task completed");
                    crate::metrics::record_completion(elapsed, ErrorCode::Success);
                }
            }
            Ok(code) => {
                log::debug!("task '{}' ({}) finished with {}", task.name, task.id, code);
                stats.increment_failed();
                #[cfg(feature = "tracing")]
                crate::metrics::record_completion(elapsed, code);
            }
            Err(panic_info) => {
                let panic_msg = panic_message(panic_info.as_ref());
                log::error!("task '{}' ({}) panicked: {}", task.name, task.id, panic_msg);
                stats.increment_panicked();
                #[cfg(feature = "tracing")]
                crate::metrics::record_panic(elapsed);
                task.body.resolve(
                    ErrorCode::InternalFailure,
                    format!("task panicked: {}", panic_msg),
                );
            }
        }

        self.finish(task, TaskState::Completed);
    }

    /// Resolve a task with an error envelope without running its work body
    pub(crate) fn resolve(&self, mut task: QueuedTask, code: ErrorCode, message: String) {
        #[cfg(feature = "tracing")]
        crate::metrics::record_cancellation(code);
        task.body.resolve(code, message);
        self.finish(task, TaskState::Cancelled);
    }

    fn finish(&self, mut task: QueuedTask, state: TaskState) {
        if let Err(panic_info) = catch_unwind(AssertUnwindSafe(|| task.body.complete())) {
            log::error!(
                "completion routine of task '{}' ({}) panicked: {}",
                task.name,
                task.id,
                panic_message(panic_info.as_ref())
            );
        }
        task.status.set(state);

        if self.registry.unregister(task.group, task.id) {
            log::trace!("group {} drained", task.group);
            self.events.notify(&EngineEvent::GroupDrained(task.group));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GroupId, ResultEnvelope, TaskDescriptor};
    use crate::queue::TaskQueue;
    use parking_lot::Mutex;

    fn fixture() -> (TaskQueue, CompletionDispatcher, Arc<HandlerRegistry<EngineEvent>>) {
        let registry = Arc::new(GroupRegistry::new());
        let events = Arc::new(HandlerRegistry::new());
        let queue = TaskQueue::new(Arc::clone(&registry));
        let dispatcher = CompletionDispatcher::new(registry, Arc::clone(&events));
        (queue, dispatcher, events)
    }

    #[test]
    fn test_panicking_work_resolves_internal_failure() {
        let (queue, dispatcher, _) = fixture();
        let stats = WorkerStats::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);

        let (task, handle) = TaskDescriptor::<u32>::new(|_| panic!("boom"))
            .on_complete(move |env| {
                *seen_clone.lock() = Some(env.code());
            })
            .into_queued();
        queue.submit(task).unwrap();
        dispatcher.execute(queue.dequeue_next().unwrap(), &stats);

        assert_eq!(*seen.lock(), Some(ErrorCode::InternalFailure));
        assert_eq!(handle.state(), TaskState::Completed);
        assert_eq!(stats.snapshot().tasks_panicked, 1);
    }

    #[test]
    fn test_cancelled_while_queued_does_not_run() {
        let (queue, dispatcher, _) = fixture();
        let stats = WorkerStats::new();
        let ran = Arc::new(Mutex::new(false));
        let ran_clone = Arc::clone(&ran);
        let code = Arc::new(Mutex::new(None));
        let code_clone = Arc::clone(&code);

        let (task, handle) = TaskDescriptor::new(move |_| {
            *ran_clone.lock() = true;
            ResultEnvelope::make_success(())
        })
        .on_complete(move |env| *code_clone.lock() = Some(env.code()))
        .into_queued();
        queue.submit(task).unwrap();
        handle.cancel();
        dispatcher.execute(queue.dequeue_next().unwrap(), &stats);

        assert!(!*ran.lock());
        assert_eq!(*code.lock(), Some(ErrorCode::Cancelled));
        assert_eq!(handle.state(), TaskState::Cancelled);
        assert_eq!(stats.snapshot().tasks_cancelled, 1);
    }

    #[test]
    fn test_group_drained_after_last_completion() {
        let (queue, dispatcher, events) = fixture();
        let stats = WorkerStats::new();
        let drained = Arc::new(Mutex::new(Vec::new()));
        let drained_clone = Arc::clone(&drained);
        events.add_handler(move |event| {
            if let EngineEvent::GroupDrained(group) = event {
                drained_clone.lock().push(*group);
            }
        });

        for _ in 0..2 {
            let (task, _) = TaskDescriptor::new(|_| ResultEnvelope::make_success(()))
                .in_group(GroupId::new(9))
                .into_queued();
            queue.submit(task).unwrap();
        }

        dispatcher.execute(queue.dequeue_next().unwrap(), &stats);
        assert!(drained.lock().is_empty());
        dispatcher.execute(queue.dequeue_next().unwrap(), &stats);
        assert_eq!(*drained.lock(), vec![GroupId::new(9)]);
        assert_eq!(queue.registry().outstanding_count(GroupId::new(9)), 0);
    }

    #[test]
    fn test_panicking_completion_is_contained() {
        let (queue, dispatcher, _) = fixture();
        let stats = WorkerStats::new();
        let (task, handle) = TaskDescriptor::new(|_| ResultEnvelope::make_success(()))
            .in_group(GroupId::new(4))
            .on_complete(|_| panic!("completion failed"))
            .into_queued();
        queue.submit(task).unwrap();
        dispatcher.execute(queue.dequeue_next().unwrap(), &stats);

        assert!(handle.is_finished());
        assert_eq!(queue.registry().outstanding_count(GroupId::new(4)), 0);
    }
}
