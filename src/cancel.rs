//! Cooperative cancellation.
//!
//! A [`CancelToken`] is a cloneable flag shared between the code that triggers
//! cancellation (a signal handler, a keypress listener, the pipeline
//! orchestrator) and the stages that honor it. Cancellation is one-way and is
//! only observed at take/add boundaries; it never interrupts a transform that
//! is already running.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag, checked cooperatively at queue boundaries.
///
/// Clones share the same underlying flag; any clone can cancel, all clones
/// observe it.
///
/// # Example
/// ```
/// use conveyor::CancelToken;
///
/// let token = CancelToken::new();
/// let observer = token.clone();
/// assert!(!observer.is_cancelled());
/// token.cancel();
/// assert!(observer.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    /// Set the flag. Idempotent; never resets.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
