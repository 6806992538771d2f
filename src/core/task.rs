//! Task descriptors, handles and lifecycle state

use crate::core::cancellation::CancellationToken;
use crate::core::envelope::ResultEnvelope;
use crate::core::error::{EngineError, ErrorCode, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> u64 {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Caller-chosen identifier clustering related tasks.
///
/// `GroupId::UNGROUPED` (0) excludes a task from group-wide wait and cancel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(u64);

impl GroupId {
    /// The "no group" id
    pub const UNGROUPED: GroupId = GroupId(0);

    /// Wrap a raw group id
    pub const fn new(id: u64) -> Self {
        GroupId(id)
    }

    /// Raw value
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this id is `UNGROUPED`
    pub const fn is_ungrouped(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for GroupId {
    fn from(id: u64) -> Self {
        GroupId(id)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a submitted task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Waiting in the queue
    Pending,
    /// Executing on a worker
    Running,
    /// Completion routine has been dispatched
    Completed,
    /// Resolved without running (group cancel, handle cancel or shutdown)
    Cancelled,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Completed,
            _ => TaskState::Cancelled,
        }
    }
}

#[derive(Debug)]
pub(crate) struct TaskStatus(AtomicU8);

impl TaskStatus {
    fn new() -> Self {
        TaskStatus(AtomicU8::new(TaskState::Pending as u8))
    }

    pub(crate) fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: TaskState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Caller-side view of a submitted task
#[derive(Clone, Debug)]
pub struct TaskHandle {
    id: u64,
    group: GroupId,
    status: Arc<TaskStatus>,
    token: CancellationToken,
}

impl TaskHandle {
    /// Unique task id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Group the task was submitted under
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        self.status.get()
    }

    /// Whether the completion routine has been dispatched
    pub fn is_finished(&self) -> bool {
        matches!(self.state(), TaskState::Completed | TaskState::Cancelled)
    }

    /// Request cooperative cancellation.
    ///
    /// A task still in the queue is resolved with `Cancelled` when a worker
    /// reaches it, without running. A running task only sees the flag.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The token handed to the work body
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

type WorkFn<T> = Box<dyn FnOnce(&CancellationToken) -> ResultEnvelope<T> + Send>;
type CompletionFn<T> = Box<dyn FnOnce(ResultEnvelope<T>) + Send>;

/// One unit of work: a work body, an optional completion routine and a group.
///
/// Contexts are whatever the closures capture.
///
/// # Example
///
/// ```rust
/// use task_engine::{GroupId, ResultEnvelope, TaskDescriptor};
///
/// let descriptor = TaskDescriptor::new(|_token| ResultEnvelope::make_success(7u32))
///     .in_group(GroupId::new(3))
///     .with_name("achievement-lookup")
///     .on_complete(|envelope| {
///         assert_eq!(envelope.into_payload().unwrap(), 7);
///     });
/// assert_eq!(descriptor.group(), GroupId::new(3));
/// ```
pub struct TaskDescriptor<T> {
    work: WorkFn<T>,
    completion: Option<CompletionFn<T>>,
    group: GroupId,
    name: String,
}

impl<T> fmt::Debug for TaskDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}

impl<T: Send + 'static> TaskDescriptor<T> {
    /// Create an ungrouped, fire-and-forget descriptor
    pub fn new<W>(work: W) -> Self
    where
        W: FnOnce(&CancellationToken) -> ResultEnvelope<T> + Send + 'static,
    {
        Self {
            work: Box::new(work),
            completion: None,
            group: GroupId::UNGROUPED,
            name: "Task".to_string(),
        }
    }

    /// Start a builder; `build()` fails if no work body is set
    pub fn builder() -> TaskBuilder<T> {
        TaskBuilder {
            work: None,
            completion: None,
            group: GroupId::UNGROUPED,
            name: None,
        }
    }

    /// Set the completion routine
    #[must_use]
    pub fn on_complete<C>(mut self, completion: C) -> Self
    where
        C: FnOnce(ResultEnvelope<T>) + Send + 'static,
    {
        self.completion = Some(Box::new(completion));
        self
    }

    /// Set the group id
    #[must_use]
    pub fn in_group(mut self, group: impl Into<GroupId>) -> Self {
        self.group = group.into();
        self
    }

    /// Name used in logs and statistics
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Group id
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type-erase into a queue entry and hand back the caller's handle
    pub(crate) fn into_queued(self) -> (QueuedTask, TaskHandle) {
        let id = next_task_id();
        let token = CancellationToken::for_task(id);
        let status = Arc::new(TaskStatus::new());
        let handle = TaskHandle {
            id,
            group: self.group,
            status: Arc::clone(&status),
            token: token.clone(),
        };
        let task = QueuedTask {
            id,
            group: self.group,
            name: self.name,
            token,
            status,
            body: Box::new(TaskBody {
                work: Some(self.work),
                completion: self.completion,
                envelope: None,
            }),
            #[cfg(feature = "tracing")]
            span: tracing::Span::current(),
        };
        (task, handle)
    }
}

/// Builder for descriptors assembled piecewise
pub struct TaskBuilder<T> {
    work: Option<WorkFn<T>>,
    completion: Option<CompletionFn<T>>,
    group: GroupId,
    name: Option<String>,
}

impl<T: Send + 'static> TaskBuilder<T> {
    /// Set the work body
    #[must_use]
    pub fn work<W>(mut self, work: W) -> Self
    where
        W: FnOnce(&CancellationToken) -> ResultEnvelope<T> + Send + 'static,
    {
        self.work = Some(Box::new(work));
        self
    }

    /// Set the completion routine
    #[must_use]
    pub fn on_complete<C>(mut self, completion: C) -> Self
    where
        C: FnOnce(ResultEnvelope<T>) + Send + 'static,
    {
        self.completion = Some(Box::new(completion));
        self
    }

    /// Set the group id
    #[must_use]
    pub fn group(mut self, group: impl Into<GroupId>) -> Self {
        self.group = group.into();
        self
    }

    /// Set the task name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Finish the descriptor
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if no work body was provided.
    pub fn build(self) -> Result<TaskDescriptor<T>> {
        let work = self
            .work
            .ok_or_else(|| EngineError::invalid_argument("work", "descriptor has no work body"))?;
        Ok(TaskDescriptor {
            work,
            completion: self.completion,
            group: self.group,
            name: self.name.unwrap_or_else(|| "Task".to_string()),
        })
    }
}

/// Type-erased task body as seen by the queue and workers
pub(crate) trait ErasedTask: Send {
    /// Run the work body and keep its envelope; returns the envelope's code.
    /// Panics from the work body propagate to the caller.
    fn run(&mut self, token: &CancellationToken) -> ErrorCode;

    /// Record an error envelope without running the work body
    fn resolve(&mut self, code: ErrorCode, message: String);

    /// Invoke the completion routine with the recorded envelope
    fn complete(&mut self);

    /// Drop the completion routine without invoking it
    fn disarm(&mut self);
}

struct TaskBody<T> {
    work: Option<WorkFn<T>>,
    completion: Option<CompletionFn<T>>,
    envelope: Option<ResultEnvelope<T>>,
}

impl<T: Send> ErasedTask for TaskBody<T> {
    fn run(&mut self, token: &CancellationToken) -> ErrorCode {
        let envelope = match self.work.take() {
            Some(work) => work(token),
            None => ResultEnvelope::make_error(ErrorCode::InvalidState, "work body already executed"),
        };
        let code = envelope.code();
        self.envelope = Some(envelope);
        code
    }

    fn resolve(&mut self, code: ErrorCode, message: String) {
        self.work = None;
        self.envelope = Some(ResultEnvelope::make_error(code, message));
    }

    fn complete(&mut self) {
        let envelope = self.envelope.take().unwrap_or_else(|| {
            ResultEnvelope::make_error(ErrorCode::InternalFailure, "task finished without a result")
        });
        if let Some(completion) = self.completion.take() {
            completion(envelope);
        }
    }

    fn disarm(&mut self) {
        self.work = None;
        self.completion = None;
    }
}

impl<T> Drop for TaskBody<T> {
    fn drop(&mut self) {
        // A task must never vanish without its completion routine running.
        if let Some(completion) = self.completion.take() {
            let envelope = self.envelope.take().unwrap_or_else(|| {
                ResultEnvelope::make_error(
                    ErrorCode::InternalFailure,
                    "task dropped before completion dispatch",
                )
            });
            if catch_unwind(AssertUnwindSafe(|| completion(envelope))).is_err() {
                log::error!("completion routine panicked while resolving a dropped task");
            }
        }
    }
}

/// A submitted task, exclusively owned by the queue and then by one worker
pub(crate) struct QueuedTask {
    pub(crate) id: u64,
    pub(crate) group: GroupId,
    pub(crate) name: String,
    pub(crate) token: CancellationToken,
    pub(crate) status: Arc<TaskStatus>,
    pub(crate) body: Box<dyn ErasedTask>,
    #[cfg(feature = "tracing")]
    pub(crate) span: tracing::Span,
}

impl fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedTask")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("name", &self.name)
            .field("state", &self.status.get())
            .finish()
    }
}
