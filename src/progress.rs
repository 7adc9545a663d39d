//! Progress logging for sink stages.
//!
//! Thread-safe counter that emits an `info!` line each time the count crosses
//! an interval boundary, plus a final line when the stage drains.

use log::info;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe interval-crossing progress logger.
///
/// # Example
/// ```
/// use conveyor::progress::ProgressTracker;
///
/// let tracker = ProgressTracker::new("sink consumed").with_interval(100);
/// for _ in 0..250 {
///     tracker.record(1); // logs at 100 and 200
/// }
/// tracker.log_final(); // logs "sink consumed 250 (complete)"
/// ```
pub struct ProgressTracker {
    interval: u64,
    message: String,
    count: AtomicU64,
}

impl ProgressTracker {
    /// Create a tracker with the default interval of 10,000 items.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { interval: 10_000, message: message.into(), count: AtomicU64::new(0) }
    }

    /// Set the logging interval.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        assert!(interval >= 1, "progress interval must be at least 1");
        self.interval = interval;
        self
    }

    /// Add `additional` items to the count, logging each interval boundary
    /// crossed. Returns `true` if the new count sits exactly on a boundary.
    pub fn record(&self, additional: u64) -> bool {
        if additional == 0 {
            let count = self.count.load(Ordering::Relaxed);
            return count > 0 && count % self.interval == 0;
        }

        let prev = self.count.fetch_add(additional, Ordering::Relaxed);
        let new_count = prev + additional;
        for crossed in (prev / self.interval + 1)..=(new_count / self.interval) {
            info!("{} {}", self.message, crossed * self.interval);
        }
        new_count % self.interval == 0
    }

    /// Log the final count unless the last `record` already landed on a
    /// boundary and logged it.
    pub fn log_final(&self) {
        if !self.record(0) {
            let count = self.count.load(Ordering::Relaxed);
            if count > 0 {
                info!("{} {} (complete)", self.message, count);
            }
        }
    }

    /// Current count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
