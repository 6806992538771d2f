//! Result envelope delivered to every completion routine

use crate::core::error::{EngineError, ErrorCode, Result};

/// Tagged success/error value produced by every task.
///
/// Exactly one of payload or error is populated. Envelopes carry no shared
/// state, so they move into completion routines on any thread without
/// additional locking.
///
/// # Example
///
/// ```rust
/// use task_engine::{ErrorCode, ResultEnvelope};
///
/// let ok = ResultEnvelope::make_success(42);
/// assert_eq!(ok.payload().copied().unwrap(), 42);
///
/// let err: ResultEnvelope<i32> = ResultEnvelope::make_error(ErrorCode::Cancelled, "group cancelled");
/// assert!(err.is_error());
/// assert_eq!(err.error_message(), Some("group cancelled"));
/// assert!(err.payload().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResultEnvelope<T> {
    /// The task produced a payload
    Success(T),
    /// The task failed, was cancelled, or never ran
    Error {
        /// Status code, never `ErrorCode::Success`
        code: ErrorCode,
        /// Human-readable message
        message: String,
    },
}

impl<T> ResultEnvelope<T> {
    /// Wrap a payload
    pub fn make_success(payload: T) -> Self {
        ResultEnvelope::Success(payload)
    }

    /// Build an error envelope.
    ///
    /// An error envelope cannot carry `ErrorCode::Success`; such a request is
    /// recorded as `InternalFailure`.
    pub fn make_error(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        if code == ErrorCode::Success {
            log::warn!("error envelope built with success code, recording internal failure: {message}");
            return ResultEnvelope::Error {
                code: ErrorCode::InternalFailure,
                message,
            };
        }
        ResultEnvelope::Error { code, message }
    }

    /// Build an error envelope from an engine error
    pub fn from_error(error: &EngineError) -> Self {
        Self::make_error(error.code(), error.to_string())
    }

    /// Whether this envelope carries an error
    pub fn is_error(&self) -> bool {
        matches!(self, ResultEnvelope::Error { .. })
    }

    /// Status code; `Success` for a payload-bearing envelope
    pub fn code(&self) -> ErrorCode {
        match self {
            ResultEnvelope::Success(_) => ErrorCode::Success,
            ResultEnvelope::Error { code, .. } => *code,
        }
    }

    /// Borrow the payload
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when called on an error envelope.
    pub fn payload(&self) -> Result<&T> {
        match self {
            ResultEnvelope::Success(payload) => Ok(payload),
            ResultEnvelope::Error { code, message } => Err(EngineError::invalid_state(format!(
                "payload requested from {code} envelope: {message}"
            ))),
        }
    }

    /// Take the payload
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when called on an error envelope.
    pub fn into_payload(self) -> Result<T> {
        match self {
            ResultEnvelope::Success(payload) => Ok(payload),
            ResultEnvelope::Error { code, message } => Err(EngineError::invalid_state(format!(
                "payload requested from {code} envelope: {message}"
            ))),
        }
    }

    /// Error message, if any
    pub fn error_message(&self) -> Option<&str> {
        match self {
            ResultEnvelope::Success(_) => None,
            ResultEnvelope::Error { message, .. } => Some(message),
        }
    }

    /// Transform the payload, keeping errors untouched
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> ResultEnvelope<U> {
        match self {
            ResultEnvelope::Success(payload) => ResultEnvelope::Success(f(payload)),
            ResultEnvelope::Error { code, message } => ResultEnvelope::Error { code, message },
        }
    }
}

impl<T> From<Result<T>> for ResultEnvelope<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(payload) => ResultEnvelope::Success(payload),
            Err(e) => ResultEnvelope::from_error(&e),
        }
    }
}
