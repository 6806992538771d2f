//! Task group registry
//!
//! Tracks outstanding tasks per group id, plus a total across every task
//! (grouped or not) so shutdown can wait for the pool to go idle.

use crate::core::{CancellationReason, CancellationToken, GroupId};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct GroupEntry {
    outstanding: usize,
    running: HashMap<u64, CancellationToken>,
}

#[derive(Debug, Default)]
struct RegistryState {
    groups: HashMap<GroupId, GroupEntry>,
    ungrouped_running: HashMap<u64, CancellationToken>,
    total: usize,
}

/// Mapping from group id to its outstanding tasks
#[derive(Debug, Default)]
pub struct GroupRegistry {
    state: Mutex<RegistryState>,
    changed: Condvar,
}

impl GroupRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly submitted task
    pub(crate) fn register(&self, group: GroupId, _task_id: u64) {
        let mut state = self.state.lock();
        state.total += 1;
        if !group.is_ungrouped() {
            state.groups.entry(group).or_default().outstanding += 1;
        }
    }

    /// Record that a task left the queue and started running
    pub(crate) fn mark_running(&self, group: GroupId, task_id: u64, token: &CancellationToken) {
        let mut state = self.state.lock();
        if group.is_ungrouped() {
            state.ungrouped_running.insert(task_id, token.clone());
        } else if let Some(entry) = state.groups.get_mut(&group) {
            entry.running.insert(task_id, token.clone());
        }
    }

    /// Remove a completed or cancelled task.
    ///
    /// Returns `true` when this drained the task's group.
    pub(crate) fn unregister(&self, group: GroupId, task_id: u64) -> bool {
        let mut state = self.state.lock();
        state.total = state.total.saturating_sub(1);

        let mut drained = false;
        if group.is_ungrouped() {
            state.ungrouped_running.remove(&task_id);
        } else {
            if let Some(entry) = state.groups.get_mut(&group) {
                entry.running.remove(&task_id);
                entry.outstanding = entry.outstanding.saturating_sub(1);
                if entry.outstanding == 0 {
                    state.groups.remove(&group);
                    drained = true;
                }
            }
        }

        if drained || state.total == 0 {
            self.changed.notify_all();
        }
        drained
    }

    /// Number of tasks in `group` that are neither completed nor cancelled.
    ///
    /// Always 0 for the ungrouped id.
    pub fn outstanding_count(&self, group: GroupId) -> usize {
        self.state
            .lock()
            .groups
            .get(&group)
            .map_or(0, |entry| entry.outstanding)
    }

    /// Outstanding tasks across every group, ungrouped included
    pub fn total_outstanding(&self) -> usize {
        self.state.lock().total
    }

    /// Set the cooperative cancellation flag of every running member.
    ///
    /// Returns how many running tasks were flagged. Queued members are
    /// removed by the task queue, not here.
    pub(crate) fn cancel_all(&self, group: GroupId) -> usize {
        let state = self.state.lock();
        let Some(entry) = state.groups.get(&group) else {
            return 0;
        };
        for token in entry.running.values() {
            token.cancel_with_reason(CancellationReason::GroupCancelled(group));
        }
        entry.running.len()
    }

    /// Flag every running task, grouped or not, with `reason`
    pub(crate) fn cancel_running(&self, reason: CancellationReason) -> usize {
        let state = self.state.lock();
        let tokens = state
            .groups
            .values()
            .flat_map(|entry| entry.running.values())
            .chain(state.ungrouped_running.values());
        let mut flagged = 0;
        for token in tokens {
            token.cancel_with_reason(reason.clone());
            flagged += 1;
        }
        flagged
    }

    /// Block until `group` has no outstanding tasks or `timeout` elapses.
    ///
    /// `None` waits forever. Returns `true` if the group drained.
    pub fn wait_group(&self, group: GroupId, timeout: Option<Duration>) -> bool {
        if group.is_ungrouped() {
            return true;
        }
        self.wait_until(timeout, |state| !state.groups.contains_key(&group))
    }

    /// Block until no task is outstanding anywhere or `timeout` elapses
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        self.wait_until(timeout, |state| state.total == 0)
    }

    fn wait_until<P>(&self, timeout: Option<Duration>, done: P) -> bool
    where
        P: Fn(&RegistryState) -> bool,
    {
        // A deadline past what `Instant` can represent waits without one.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.state.lock();
        while !done(&state) {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        return done(&state);
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
        true
    }
}
