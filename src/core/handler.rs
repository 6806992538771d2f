//! Registry of process-wide notification handlers
//!
//! Handlers are added with [`HandlerRegistry::add_handler`], which returns an
//! opaque [`HandlerToken`]. Removing a token twice is a silent no-op.
//!
//! ```rust
//! use task_engine::HandlerRegistry;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct SignOutCompleted { user: String }
//!
//! let registry = HandlerRegistry::<SignOutCompleted>::new();
//! let hits = Arc::new(AtomicUsize::new(0));
//! let hits_clone = Arc::clone(&hits);
//! let token = registry.add_handler(move |_event| {
//!     hits_clone.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! registry.notify(&SignOutCompleted { user: "player-1".into() });
//! assert!(registry.remove_handler(token));
//! assert!(!registry.remove_handler(token));
//! registry.notify(&SignOutCompleted { user: "player-1".into() });
//! assert_eq!(hits.load(Ordering::SeqCst), 1);
//! ```

use crate::core::task::GroupId;
use parking_lot::RwLock;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Notifications published by a [`TaskEngine`](crate::TaskEngine)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// The last outstanding task of a group finished or was cancelled
    GroupDrained(GroupId),
    /// The pool's target thread count changed
    PoolResized {
        /// New target, already clamped to the ceiling
        target: usize,
    },
    /// The pool finished shutting down
    ShutdownCompleted {
        /// Whether queued work was drained rather than discarded
        drained: bool,
    },
}

/// Opaque, unique token identifying a registered handler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerToken(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Thread-safe list of event handlers
pub struct HandlerRegistry<E> {
    handlers: RwLock<Vec<(HandlerToken, Handler<E>)>>,
}

impl<E> fmt::Debug for HandlerRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}

impl<E> Default for HandlerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> HandlerRegistry<E> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register a handler and return its token
    pub fn add_handler<F>(&self, handler: F) -> HandlerToken
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let token = HandlerToken(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((token, Arc::new(handler)));
        token
    }

    /// Remove a handler. Returns whether it was still registered.
    pub fn remove_handler(&self, token: HandlerToken) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(t, _)| *t != token);
        handlers.len() != before
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Invoke every handler with `event`.
    ///
    /// Handlers run outside the registry lock, so they may add or remove
    /// handlers. A panicking handler is logged and skipped.
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                log::error!("event handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_tokens_are_unique() {
        let registry = HandlerRegistry::<()>::new();
        let a = registry.add_handler(|_| {});
        let b = registry.add_handler(|_| {});
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_double_removal_is_noop() {
        let registry = HandlerRegistry::<u32>::new();
        let token = registry.add_handler(|_| {});
        assert!(registry.remove_handler(token));
        assert!(!registry.remove_handler(token));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_panicking_handler_does_not_stop_others() {
        let registry = HandlerRegistry::<u32>::new();
        let sum = Arc::new(AtomicUsize::new(0));
        let sum_clone = Arc::clone(&sum);

        registry.add_handler(|_| panic!("bad handler"));
        registry.add_handler(move |v| {
            sum_clone.fetch_add(*v as usize, Ordering::SeqCst);
        });

        registry.notify(&5);
        assert_eq!(sum.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_handler_can_remove_itself() {
        let registry = Arc::new(HandlerRegistry::<()>::new());
        let slot: Arc<parking_lot::Mutex<Option<HandlerToken>>> = Arc::new(parking_lot::Mutex::new(None));

        let registry_clone = Arc::clone(&registry);
        let slot_clone = Arc::clone(&slot);
        let token = registry.add_handler(move |_| {
            if let Some(t) = *slot_clone.lock() {
                registry_clone.remove_handler(t);
            }
        });
        *slot.lock() = Some(token);

        registry.notify(&());
        assert!(registry.is_empty());
    }
}
