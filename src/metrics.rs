//! Metrics recording functions for observability.
//!
//! These functions emit tracing events that can be consumed by
//! metrics collection systems like Prometheus via tracing-opentelemetry.

use crate::core::{ErrorCode, GroupId};
use std::time::Duration;

/// Records a task submission event.
#[inline]
pub fn record_submission(queue_depth: usize) {
    tracing::trace!(
        counter.tasks_submitted = 1,
        gauge.queue_depth = queue_depth as i64,
        "task submitted"
    );
}

/// Records task completion with timing.
#[inline]
pub fn record_completion(duration: Duration, code: ErrorCode) {
    let duration_ms = duration.as_millis() as u64;
    if code == ErrorCode::Success {
        tracing::trace!(
            counter.tasks_completed = 1,
            histogram.task_duration_ms = duration_ms,
            "task completed successfully"
        );
    } else {
        tracing::trace!(
            counter.tasks_failed = 1,
            histogram.task_duration_ms = duration_ms,
            code = code.as_str(),
            "task failed"
        );
    }
}

/// Records a task panic event.
#[inline]
pub fn record_panic(duration: Duration) {
    tracing::trace!(
        counter.tasks_panicked = 1,
        histogram.task_duration_ms = duration.as_millis() as u64,
        "task panicked"
    );
}

/// Records a task resolved without running.
#[inline]
pub fn record_cancellation(code: ErrorCode) {
    tracing::trace!(counter.tasks_cancelled = 1, code = code.as_str(), "task resolved without running");
}

/// Records worker becoming busy.
#[inline]
pub fn record_worker_busy(slot: usize) {
    tracing::trace!(gauge.workers_busy = 1, slot = slot, "worker busy");
}

/// Records worker becoming idle.
#[inline]
pub fn record_worker_idle(slot: usize) {
    tracing::trace!(gauge.workers_busy = -1i64, slot = slot, "worker idle");
}

/// Records a group cancellation.
#[inline]
pub fn record_group_cancel(group: GroupId, removed: usize) {
    tracing::debug!(group = group.get(), removed = removed, "task group cancelled");
}

/// Records pool startup.
#[inline]
pub fn record_pool_start(num_workers: usize, ceiling: usize) {
    tracing::info!(workers = num_workers, ceiling = ceiling, "worker pool started");
}

/// Records a change of the target thread count.
#[inline]
pub fn record_pool_resize(target: usize, spawned: usize) {
    tracing::info!(
        gauge.target_threads = target as i64,
        spawned = spawned,
        "worker pool resized"
    );
}

/// Records pool shutdown.
#[inline]
pub fn record_pool_shutdown(tasks_completed: u64, tasks_failed: u64) {
    tracing::info!(
        tasks_completed = tasks_completed,
        tasks_failed = tasks_failed,
        "worker pool shutdown complete"
    );
}
