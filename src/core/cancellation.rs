//! Cooperative cancellation for running tasks
//!
//! The engine cannot interrupt an opaque work body. Instead every task gets a
//! [`CancellationToken`] which the work body may poll at safe points. Group
//! cancellation and per-task [`TaskHandle::cancel`](crate::TaskHandle::cancel)
//! only set this flag for tasks that have already started.
//!
//! # Example
//!
//! ```rust
//! use task_engine::CancellationToken;
//!
//! let token = CancellationToken::new();
//! let worker_view = token.clone();
//!
//! assert!(worker_view.check().is_ok());
//! token.cancel();
//! assert!(worker_view.is_cancelled());
//! assert!(worker_view.check().is_err());
//! ```

use crate::core::error::{EngineError, Result};
use crate::core::task::GroupId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reason a token was cancelled
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CancellationReason {
    /// Cancelled through a task handle or `cancel()`
    Manual,
    /// The task's group was cancelled while the task was running
    GroupCancelled(GroupId),
    /// The pool is shutting down
    Shutdown,
}

impl std::fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancellationReason::Manual => write!(f, "manually cancelled"),
            CancellationReason::GroupCancelled(group) => write!(f, "group {} cancelled", group),
            CancellationReason::Shutdown => write!(f, "pool shutting down"),
        }
    }
}

#[derive(Debug)]
struct TokenInner {
    task_id: u64,
    cancelled: AtomicBool,
    reason: RwLock<Option<CancellationReason>>,
}

/// A thread-safe cancellation flag shared between a task and its controllers
#[derive(Clone, Debug)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    /// Create a standalone token (not cancelled)
    pub fn new() -> Self {
        Self::for_task(0)
    }

    pub(crate) fn for_task(task_id: u64) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                task_id,
                cancelled: AtomicBool::new(false),
                reason: RwLock::new(None),
            }),
        }
    }

    /// Cancel with reason `Manual`
    pub fn cancel(&self) {
        self.cancel_with_reason(CancellationReason::Manual);
    }

    /// Cancel with a specific reason.
    ///
    /// Idempotent: only the first call records its reason.
    pub fn cancel_with_reason(&self, reason: CancellationReason) {
        // The reason is stored before the flag so a reader that sees the
        // flag also sees the reason.
        let mut slot = self.inner.reason.write();
        if self.inner.cancelled.load(Ordering::Acquire) {
            return;
        }
        *slot = Some(reason);
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// Check if this token has been cancelled
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// The cancellation reason, if cancelled
    pub fn reason(&self) -> Option<CancellationReason> {
        self.inner.reason.read().clone()
    }

    /// Returns `Cancelled` if the token was cancelled, `Ok(())` otherwise.
    ///
    /// Meant for early returns inside work bodies:
    ///
    /// ```rust
    /// use task_engine::{CancellationToken, Result};
    ///
    /// fn fetch_pages(token: &CancellationToken) -> Result<u32> {
    ///     let mut pages = 0;
    ///     for _ in 0..10 {
    ///         token.check()?;
    ///         pages += 1;
    ///     }
    ///     Ok(pages)
    /// }
    /// # assert_eq!(fetch_pages(&CancellationToken::new()).unwrap(), 10);
    /// ```
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            let reason = self
                .reason()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "cancelled".to_string());
            return Err(EngineError::cancelled(self.inner.task_id, reason));
        }
        Ok(())
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_token_starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.reason(), None);
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::for_task(9);
        token.cancel_with_reason(CancellationReason::GroupCancelled(GroupId::new(4)));
        token.cancel();

        assert_eq!(
            token.reason(),
            Some(CancellationReason::GroupCancelled(GroupId::new(4)))
        );
        let err = token.check().unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { task_id: 9, .. }));
        assert!(err.to_string().contains("group 4 cancelled"));
    }

    #[test]
    fn test_cancel_visible_across_threads() {
        let token = CancellationToken::new();
        let observer = token.clone();

        let handle = thread::spawn(move || {
            for _ in 0..200 {
                if observer.is_cancelled() {
                    return true;
                }
                thread::sleep(Duration::from_millis(5));
            }
            false
        });

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
    }
}
