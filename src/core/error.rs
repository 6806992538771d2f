//! Error types for the task engine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for task engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Status taxonomy shared by synchronous errors and result envelopes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCode {
    /// The operation succeeded
    Success,
    /// Malformed descriptor or configuration
    InvalidArgument,
    /// Operation not valid for the current state of a value
    InvalidState,
    /// The engine has not been initialized, or was torn down
    NotInitialized,
    /// Submission rejected because shutdown has begun
    QueueShutdown,
    /// Task resolved without running because the pool shut down
    Shutdown,
    /// Task group was cancelled before the task started
    Cancelled,
    /// Thread ceiling reached; the request was clamped
    ResourceExhausted,
    /// An unexpected fault escaped a work body
    InternalFailure,
}

impl ErrorCode {
    /// Stable, human-readable name of the code
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::NotInitialized => "not_initialized",
            ErrorCode::QueueShutdown => "queue_shutdown",
            ErrorCode::Shutdown => "shutdown",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::ResourceExhausted => "resource_exhausted",
            ErrorCode::InternalFailure => "internal_failure",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in the task engine
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Malformed descriptor or configuration parameter
    #[error("Invalid argument '{parameter}': {message}")]
    InvalidArgument {
        /// Name of the offending parameter
        parameter: String,
        /// Error message
        message: String,
    },

    /// Value accessed in a state that does not support the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Engine used before `init` or after `teardown`
    #[error("Task engine is not initialized")]
    NotInitialized,

    /// Submission rejected because the queue stopped accepting work
    #[error("Task queue is shut down ({pending_tasks} tasks pending)")]
    QueueShutdown {
        /// Number of tasks still queued when the submission was rejected
        pending_tasks: usize,
    },

    /// Operation rejected because the pool has already shut down
    #[error("Worker pool '{pool_name}' has shut down")]
    Shutdown {
        /// Name of the worker pool
        pool_name: String,
    },

    /// Task was cancelled
    #[error("Task cancelled (task_id: {task_id}): {reason}")]
    Cancelled {
        /// ID of the cancelled task
        task_id: u64,
        /// Reason for cancellation
        reason: String,
    },

    /// Request exceeded the hard thread ceiling
    #[error("Resource exhausted: requested {requested}, ceiling is {ceiling}")]
    ResourceExhausted {
        /// Requested value
        requested: usize,
        /// Configured ceiling
        ceiling: usize,
    },

    /// Unexpected fault inside the engine or a work body
    #[error("Internal failure: {0}")]
    InternalFailure(String),

    /// Worker pool is already running
    #[error("Worker pool '{pool_name}' is already running with {worker_count} workers")]
    AlreadyRunning {
        /// Name of the worker pool
        pool_name: String,
        /// Number of live worker threads
        worker_count: usize,
    },

    /// Failed to spawn a worker thread
    #[error("Failed to spawn worker thread #{slot}: {message}")]
    SpawnError {
        /// Slot of the worker that failed to spawn
        slot: usize,
        /// Error message
        message: String,
        /// Source IO error
        #[source]
        source: Option<std::io::Error>,
    },

    /// Failed to join a worker thread
    #[error("Failed to join worker thread #{slot}: {message}")]
    JoinError {
        /// Slot of the worker that failed to join
        slot: usize,
        /// Error message
        message: String,
    },

    /// Configuration could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl EngineError {
    /// Create an invalid argument error
    pub fn invalid_argument(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::InvalidArgument {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        EngineError::InvalidState(message.into())
    }

    /// Create a queue shutdown error
    pub fn queue_shutdown(pending_tasks: usize) -> Self {
        EngineError::QueueShutdown { pending_tasks }
    }

    /// Create a pool shutdown error
    pub fn shutdown(pool_name: impl Into<String>) -> Self {
        EngineError::Shutdown {
            pool_name: pool_name.into(),
        }
    }

    /// Create a cancelled error
    pub fn cancelled(task_id: u64, reason: impl Into<String>) -> Self {
        EngineError::Cancelled {
            task_id,
            reason: reason.into(),
        }
    }

    /// Create a resource exhausted error
    pub fn resource_exhausted(requested: usize, ceiling: usize) -> Self {
        EngineError::ResourceExhausted { requested, ceiling }
    }

    /// Create an internal failure error
    pub fn internal(message: impl Into<String>) -> Self {
        EngineError::InternalFailure(message.into())
    }

    /// Create an already running error
    pub fn already_running(pool_name: impl Into<String>, worker_count: usize) -> Self {
        EngineError::AlreadyRunning {
            pool_name: pool_name.into(),
            worker_count,
        }
    }

    /// Create a spawn error with source
    pub fn spawn_with_source(slot: usize, message: impl Into<String>, source: std::io::Error) -> Self {
        EngineError::SpawnError {
            slot,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a join error
    pub fn join(slot: usize, message: impl Into<String>) -> Self {
        EngineError::JoinError {
            slot,
            message: message.into(),
        }
    }

    /// The status code this error maps to in a result envelope
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::InvalidArgument { .. } | EngineError::Config(_) => {
                ErrorCode::InvalidArgument
            }
            EngineError::InvalidState(_) | EngineError::AlreadyRunning { .. } => {
                ErrorCode::InvalidState
            }
            EngineError::NotInitialized => ErrorCode::NotInitialized,
            EngineError::QueueShutdown { .. } => ErrorCode::QueueShutdown,
            EngineError::Shutdown { .. } => ErrorCode::Shutdown,
            EngineError::Cancelled { .. } => ErrorCode::Cancelled,
            EngineError::ResourceExhausted { .. } => ErrorCode::ResourceExhausted,
            EngineError::InternalFailure(_)
            | EngineError::SpawnError { .. }
            | EngineError::JoinError { .. } => ErrorCode::InternalFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = EngineError::already_running("main_pool", 8);
        assert!(matches!(err, EngineError::AlreadyRunning { .. }));

        let err = EngineError::queue_shutdown(3);
        assert!(matches!(err, EngineError::QueueShutdown { pending_tasks: 3 }));

        let err = EngineError::cancelled(7, "group cancelled");
        assert!(matches!(err, EngineError::Cancelled { task_id: 7, .. }));
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::already_running("worker_pool", 4);
        assert_eq!(
            err.to_string(),
            "Worker pool 'worker_pool' is already running with 4 workers"
        );

        let err = EngineError::resource_exhausted(100, 64);
        assert_eq!(
            err.to_string(),
            "Resource exhausted: requested 100, ceiling is 64"
        );

        assert_eq!(
            EngineError::NotInitialized.to_string(),
            "Task engine is not initialized"
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(EngineError::NotInitialized.code(), ErrorCode::NotInitialized);
        assert_eq!(EngineError::queue_shutdown(0).code(), ErrorCode::QueueShutdown);
        assert_eq!(
            EngineError::invalid_argument("max_threads", "must be > 0").code(),
            ErrorCode::InvalidArgument
        );
        assert_eq!(EngineError::internal("boom").code(), ErrorCode::InternalFailure);
        assert_eq!(ErrorCode::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_spawn_error_with_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = EngineError::spawn_with_source(5, "Cannot create thread", io_err);

        assert!(matches!(err, EngineError::SpawnError { .. }));
        assert!(err.to_string().contains("worker thread #5"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
