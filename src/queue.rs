//! Fixed-capacity blocking queue with a one-way completion signal.
//!
//! [`BoundedQueue`] is the building block for pipeline flow control: producers
//! block (or time out) when the queue is full, consumers block (or time out)
//! when it is empty, and a completion flag lets a producer say "no more input"
//! without losing items that are still buffered.
//!
//! # Key Types
//!
//! - [`BoundedQueue`]: the queue itself
//! - [`TakeOutcome`]: result of a bounded-wait take
//! - [`AddError`]: rejected adds, carrying the item back to the caller
//! - [`QueueStats`]: per-queue statistics snapshot

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Outcome of a bounded-wait take.
#[derive(Debug, PartialEq, Eq)]
pub enum TakeOutcome<T> {
    /// The oldest buffered item was dequeued.
    Item(T),
    /// No item became available before the deadline; the queue is still open.
    TimedOut,
    /// The queue is complete and every buffered item has been taken.
    Drained,
}

impl<T> TakeOutcome<T> {
    /// Unwrap the item, if any.
    pub fn into_item(self) -> Option<T> {
        match self {
            TakeOutcome::Item(item) => Some(item),
            TakeOutcome::TimedOut | TakeOutcome::Drained => None,
        }
    }
}

/// Error returned when an add cannot be accepted.
///
/// The rejected item is handed back so the caller can retry it elsewhere.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddError<T> {
    /// The queue is complete; no further items may be added.
    #[error("queue is closed to new items")]
    Closed(T),
    /// No capacity became available before the deadline.
    #[error("no capacity became available before the deadline")]
    Timeout(T),
}

impl<T> AddError<T> {
    /// Recover the rejected item.
    pub fn into_item(self) -> T {
        match self {
            AddError::Closed(item) | AddError::Timeout(item) => item,
        }
    }
}

/// Statistics snapshot for a single queue.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    /// Total items accepted.
    pub total_added: u64,
    /// Total items taken.
    pub total_taken: u64,
    /// Peak buffered length observed.
    pub peak_len: u64,
    /// Cumulative time adders spent blocked waiting for capacity.
    pub add_blocked: Duration,
    /// Cumulative time takers spent blocked waiting for data.
    pub take_blocked: Duration,
}

struct Inner<T> {
    items: VecDeque<T>,
    complete: bool,
}

/// A fixed-capacity, thread-safe FIFO with blocking put/take and completion.
///
/// The buffered count never exceeds the capacity given at construction. Once
/// [`complete`](BoundedQueue::complete) is called no further items are
/// accepted, but buffered items remain takeable until drained; only then do
/// takers see [`TakeOutcome::Drained`].
///
/// Each queue synchronizes itself with its own lock/condvar pair, so a group
/// of queues distributes contention across members rather than funneling
/// through one lock.
///
/// # Example
///
/// ```
/// use conveyor::queue::BoundedQueue;
///
/// let queue = BoundedQueue::new(2);
/// queue.add(1).unwrap();
/// queue.add(2).unwrap();
/// queue.complete();
///
/// assert_eq!(queue.take(), Some(1));
/// assert_eq!(queue.take(), Some(2));
/// assert_eq!(queue.take(), None); // complete and drained
/// ```
pub struct BoundedQueue<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,

    // Stats
    total_added: AtomicU64,
    total_taken: AtomicU64,
    peak_len: AtomicU64,
    add_blocked_ns: AtomicU64,
    take_blocked_ns: AtomicU64,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "queue capacity must be at least 1");
        Self {
            capacity,
            inner: Mutex::new(Inner { items: VecDeque::with_capacity(capacity), complete: false }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            total_added: AtomicU64::new(0),
            total_taken: AtomicU64::new(0),
            peak_len: AtomicU64::new(0),
            add_blocked_ns: AtomicU64::new(0),
            take_blocked_ns: AtomicU64::new(0),
        }
    }

    // ========== Producer Side ==========

    /// Add an item, blocking while the queue is full.
    ///
    /// Wakes one waiting taker on success.
    ///
    /// # Errors
    ///
    /// Returns [`AddError::Closed`] with the item if the queue is complete.
    pub fn add(&self, item: T) -> Result<(), AddError<T>> {
        let mut inner = self.inner.lock();
        if !inner.complete && inner.items.len() == self.capacity {
            let blocked_at = Instant::now();
            self.not_full
                .wait_while(&mut inner, |inner| !inner.complete && inner.items.len() == self.capacity);
            self.record_blocked(&self.add_blocked_ns, blocked_at);
        }
        if inner.complete {
            return Err(AddError::Closed(item));
        }
        self.push_locked(&mut inner, item);
        Ok(())
    }

    /// Add an item, waiting at most `timeout` for capacity.
    ///
    /// A zero timeout makes a single immediate attempt.
    ///
    /// # Errors
    ///
    /// Returns [`AddError::Closed`] if the queue is complete, or
    /// [`AddError::Timeout`] if it stayed full past the deadline. Both carry
    /// the rejected item.
    pub fn try_add(&self, item: T, timeout: Duration) -> Result<(), AddError<T>> {
        let mut inner = self.inner.lock();
        if !inner.complete && inner.items.len() == self.capacity && !timeout.is_zero() {
            let deadline = Instant::now() + timeout;
            let blocked_at = Instant::now();
            self.not_full.wait_while_until(
                &mut inner,
                |inner| !inner.complete && inner.items.len() == self.capacity,
                deadline,
            );
            self.record_blocked(&self.add_blocked_ns, blocked_at);
        }
        if inner.complete {
            return Err(AddError::Closed(item));
        }
        if inner.items.len() == self.capacity {
            return Err(AddError::Timeout(item));
        }
        self.push_locked(&mut inner, item);
        Ok(())
    }

    // ========== Consumer Side ==========

    /// Take the oldest item, blocking while the queue is empty and open.
    ///
    /// Returns `None` once the queue is complete and drained.
    pub fn take(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        if inner.items.is_empty() && !inner.complete {
            let blocked_at = Instant::now();
            self.not_empty.wait_while(&mut inner, |inner| inner.items.is_empty() && !inner.complete);
            self.record_blocked(&self.take_blocked_ns, blocked_at);
        }
        self.pop_locked(&mut inner)
    }

    /// Take the oldest item, waiting at most `timeout` for data.
    ///
    /// A zero timeout makes a single immediate attempt.
    pub fn try_take(&self, timeout: Duration) -> TakeOutcome<T> {
        let mut inner = self.inner.lock();
        if inner.items.is_empty() && !inner.complete && !timeout.is_zero() {
            let deadline = Instant::now() + timeout;
            let blocked_at = Instant::now();
            self.not_empty.wait_while_until(
                &mut inner,
                |inner| inner.items.is_empty() && !inner.complete,
                deadline,
            );
            self.record_blocked(&self.take_blocked_ns, blocked_at);
        }
        match self.pop_locked(&mut inner) {
            Some(item) => TakeOutcome::Item(item),
            None if inner.complete => TakeOutcome::Drained,
            None => TakeOutcome::TimedOut,
        }
    }

    // ========== Completion ==========

    /// Mark the queue complete. Idempotent.
    ///
    /// Wakes every blocked adder and taker so they observe the new state:
    /// adds fail, takes drain the remaining items and then report
    /// [`TakeOutcome::Drained`].
    pub fn complete(&self) {
        let mut inner = self.inner.lock();
        if !inner.complete {
            inner.complete = true;
            self.not_full.notify_all();
            self.not_empty.notify_all();
        }
    }

    // ========== Observers ==========

    /// Maximum number of buffered items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of buffered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Check whether no items are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Check whether the completion flag is set (items may remain buffered).
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.inner.lock().complete
    }

    /// Check whether the queue is complete *and* empty.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.lock();
        inner.complete && inner.items.is_empty()
    }

    /// Snapshot the queue's statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            total_added: self.total_added.load(Ordering::Relaxed),
            total_taken: self.total_taken.load(Ordering::Relaxed),
            peak_len: self.peak_len.load(Ordering::Relaxed),
            add_blocked: Duration::from_nanos(self.add_blocked_ns.load(Ordering::Relaxed)),
            take_blocked: Duration::from_nanos(self.take_blocked_ns.load(Ordering::Relaxed)),
        }
    }

    // ========== Internals ==========

    fn push_locked(&self, inner: &mut Inner<T>, item: T) {
        inner.items.push_back(item);
        self.total_added.fetch_add(1, Ordering::Relaxed);

        // Update peak using CAS loop
        let len = inner.items.len() as u64;
        let mut peak = self.peak_len.load(Ordering::Relaxed);
        while len > peak {
            match self.peak_len.compare_exchange_weak(peak, len, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }

        self.not_empty.notify_one();
    }

    fn pop_locked(&self, inner: &mut Inner<T>) -> Option<T> {
        let item = inner.items.pop_front()?;
        self.total_taken.fetch_add(1, Ordering::Relaxed);
        self.not_full.notify_one();
        Some(item)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn record_blocked(&self, counter: &AtomicU64, blocked_at: Instant) {
        counter.fetch_add(blocked_at.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("len", &inner.items.len())
            .field("complete", &inner.complete)
            .finish()
    }
}
