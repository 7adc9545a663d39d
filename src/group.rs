//! A fixed set of bounded queues addressed as one logical channel.
//!
//! [`QueueGroup`] fans work across N member [`BoundedQueue`]s, conceptually
//! one per concurrent producer or consumer. "Any" operations rotate across the
//! members: `add_to_any` lands on the first queue with space, `take_from_any`
//! drains the first queue with data. This trades strict FIFO ordering across
//! the whole group for reduced lock contention; ordering is guaranteed only
//! within a single member queue.
//!
//! Waiting is done in short bounded poll/backoff cycles so cancellation and
//! deadlines are noticed promptly. The backoff yields at its floor and sleeps
//! with a capped exponential above it, keeping rendezvous latency low while
//! idle groups stay cheap.

use log::debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::queue::{AddError, BoundedQueue, QueueStats, TakeOutcome};

/// Minimum backoff before re-polling the members (yield, no sleep).
const MIN_BACKOFF_US: u64 = 10;
/// Maximum backoff between polls.
const MAX_BACKOFF_US: u64 = 1000;

/// Outcome of a bounded-wait take across a group.
#[derive(Debug, PartialEq, Eq)]
pub enum GroupTakeOutcome<T> {
    /// An item was dequeued from the member at `source`.
    Item {
        /// The dequeued item.
        item: T,
        /// Index of the member queue that supplied it.
        source: usize,
    },
    /// No member had data before the deadline; at least one is still open.
    TimedOut,
    /// The cancellation token fired while waiting.
    Cancelled,
    /// Every member is complete and drained.
    Drained,
}

impl<T> GroupTakeOutcome<T> {
    /// Unwrap the item, if any.
    pub fn into_item(self) -> Option<T> {
        match self {
            GroupTakeOutcome::Item { item, .. } => Some(item),
            _ => None,
        }
    }
}

/// Error returned when an add could not land on any member.
///
/// The rejected item is handed back to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupAddError<T> {
    /// Every member queue is complete.
    #[error("every member queue is closed")]
    AllClosed(T),
    /// No member had capacity before the deadline.
    #[error("no member queue had capacity before the deadline")]
    Timeout(T),
    /// The cancellation token fired while waiting for capacity.
    #[error("cancelled while waiting for queue capacity")]
    Cancelled(T),
}

impl<T> GroupAddError<T> {
    /// Recover the rejected item.
    pub fn into_item(self) -> T {
        match self {
            GroupAddError::AllClosed(item)
            | GroupAddError::Timeout(item)
            | GroupAddError::Cancelled(item) => item,
        }
    }
}

/// Result of one non-blocking rotation over the members.
enum RotationMiss<T> {
    /// Every member was full (but at least one is open).
    AllFull(T),
    /// Every member was complete.
    AllClosed(T),
}

/// A fixed set of [`BoundedQueue`]s addressed as a single logical channel.
///
/// Membership is fixed at construction. The group itself adds no lock; each
/// member synchronizes itself, and rotation cursors are atomics so concurrent
/// callers start their scans at different members.
///
/// A group is typically owned by the stage that feeds it and shared (via
/// `Arc`) with the stage that drains it.
///
/// # Example
///
/// ```
/// use conveyor::{CancelToken, QueueGroup};
/// use conveyor::group::GroupTakeOutcome;
/// use std::time::Duration;
///
/// let group = QueueGroup::new(2, 8);
/// let cancel = CancelToken::new();
/// group.add_to_any(42, &cancel).unwrap();
/// match group.take_from_any(Duration::from_millis(10), &cancel) {
///     GroupTakeOutcome::Item { item, .. } => assert_eq!(item, 42),
///     other => panic!("unexpected outcome: {other:?}"),
/// }
/// ```
pub struct QueueGroup<T> {
    members: Vec<BoundedQueue<T>>,
    add_cursor: AtomicUsize,
    take_cursor: AtomicUsize,
}

impl<T> QueueGroup<T> {
    /// Create a group of `num_members` queues, each holding `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `num_members` is zero or `capacity` is zero.
    #[must_use]
    pub fn new(num_members: usize, capacity: usize) -> Self {
        assert!(num_members >= 1, "a queue group needs at least one member");
        let members = (0..num_members).map(|_| BoundedQueue::new(capacity)).collect();
        Self { members, add_cursor: AtomicUsize::new(0), take_cursor: AtomicUsize::new(0) }
    }

    // ========== Producer Side ==========

    /// Add an item to the first member with capacity, blocking while all are
    /// full.
    ///
    /// Returns the index of the member that accepted the item. The wait is a
    /// bounded poll/backoff cycle; the cancellation token is observed between
    /// cycles.
    ///
    /// # Errors
    ///
    /// [`GroupAddError::AllClosed`] once every member is complete,
    /// [`GroupAddError::Cancelled`] if the token fires first. Both carry the
    /// item back.
    pub fn add_to_any(&self, item: T, cancel: &CancelToken) -> Result<usize, GroupAddError<T>> {
        let mut item = item;
        let mut backoff = Backoff::new();
        loop {
            if cancel.is_cancelled() {
                return Err(GroupAddError::Cancelled(item));
            }
            match self.offer_rotation(item) {
                Ok(index) => return Ok(index),
                Err(RotationMiss::AllClosed(rejected)) => {
                    return Err(GroupAddError::AllClosed(rejected));
                }
                Err(RotationMiss::AllFull(rejected)) => {
                    item = rejected;
                    backoff.wait();
                }
            }
        }
    }

    /// Add an item to the first member with capacity, waiting at most
    /// `timeout`.
    ///
    /// A zero timeout makes a single rotation over the members.
    ///
    /// # Errors
    ///
    /// [`GroupAddError::AllClosed`] once every member is complete,
    /// [`GroupAddError::Timeout`] if all stayed full past the deadline.
    pub fn try_add_to_any(&self, item: T, timeout: Duration) -> Result<usize, GroupAddError<T>> {
        let deadline = Instant::now() + timeout;
        let mut item = item;
        let mut backoff = Backoff::new();
        loop {
            match self.offer_rotation(item) {
                Ok(index) => return Ok(index),
                Err(RotationMiss::AllClosed(rejected)) => {
                    return Err(GroupAddError::AllClosed(rejected));
                }
                Err(RotationMiss::AllFull(rejected)) => {
                    if Instant::now() >= deadline {
                        return Err(GroupAddError::Timeout(rejected));
                    }
                    item = rejected;
                    backoff.wait_until(deadline);
                }
            }
        }
    }

    // ========== Consumer Side ==========

    /// Take an item from the first member with data, waiting at most
    /// `timeout`.
    ///
    /// Polls across the members from a rotating start index; between empty
    /// rotations it backs off briefly, observing the cancellation token and
    /// the deadline. This is the suspension point a pipeline stage parks in.
    pub fn take_from_any(&self, timeout: Duration, cancel: &CancelToken) -> GroupTakeOutcome<T> {
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new();
        loop {
            if cancel.is_cancelled() {
                return GroupTakeOutcome::Cancelled;
            }

            let start = self.take_cursor.fetch_add(1, Ordering::Relaxed) % self.members.len();
            let mut drained = 0;
            for offset in 0..self.members.len() {
                let index = (start + offset) % self.members.len();
                match self.members[index].try_take(Duration::ZERO) {
                    TakeOutcome::Item(item) => return GroupTakeOutcome::Item { item, source: index },
                    TakeOutcome::Drained => drained += 1,
                    TakeOutcome::TimedOut => {}
                }
            }
            if drained == self.members.len() {
                return GroupTakeOutcome::Drained;
            }
            if Instant::now() >= deadline {
                return GroupTakeOutcome::TimedOut;
            }
            backoff.wait_until(deadline);
        }
    }

    // ========== Completion ==========

    /// Mark every member complete. Idempotent.
    pub fn complete_all(&self) {
        debug!("completing all {} member queues", self.members.len());
        for member in &self.members {
            member.complete();
        }
    }

    /// Check whether every member is complete *and* drained.
    ///
    /// Completion is only observed after all previously buffered items have
    /// been taken, so a `true` here means the logical channel is finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.members.iter().all(BoundedQueue::is_drained)
    }

    // ========== Observers ==========

    /// Number of member queues.
    #[must_use]
    pub fn num_members(&self) -> usize {
        self.members.len()
    }

    /// Borrow a member queue by index.
    #[must_use]
    pub fn member(&self, index: usize) -> &BoundedQueue<T> {
        &self.members[index]
    }

    /// Total buffered items across all members.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.members.iter().map(BoundedQueue::len).sum()
    }

    /// Current buffered length of each member.
    #[must_use]
    pub fn depths(&self) -> Vec<usize> {
        self.members.iter().map(BoundedQueue::len).collect()
    }

    /// Snapshot statistics for each member.
    #[must_use]
    pub fn stats(&self) -> Vec<QueueStats> {
        self.members.iter().map(BoundedQueue::stats).collect()
    }

    // ========== Internals ==========

    /// One non-blocking rotation over the members, starting at the add
    /// cursor. First queue with space wins.
    fn offer_rotation(&self, item: T) -> Result<usize, RotationMiss<T>> {
        let start = self.add_cursor.fetch_add(1, Ordering::Relaxed) % self.members.len();
        let mut item = item;
        let mut closed = 0;
        for offset in 0..self.members.len() {
            let index = (start + offset) % self.members.len();
            match self.members[index].try_add(item, Duration::ZERO) {
                Ok(()) => return Ok(index),
                Err(AddError::Closed(rejected)) => {
                    closed += 1;
                    item = rejected;
                }
                Err(AddError::Timeout(rejected)) => item = rejected,
            }
        }
        if closed == self.members.len() {
            Err(RotationMiss::AllClosed(item))
        } else {
            Err(RotationMiss::AllFull(item))
        }
    }
}

impl<T> std::fmt::Debug for QueueGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueGroup")
            .field("num_members", &self.members.len())
            .field("depths", &self.depths())
            .field("is_complete", &self.is_complete())
            .finish()
    }
}

/// Capped exponential backoff for the poll cycles.
///
/// Yields at the floor (a sleep syscall costs more than it saves there) and
/// doubles the sleep up to the cap above it. Reset happens by constructing a
/// fresh value per wait loop.
struct Backoff {
    backoff_us: u64,
}

impl Backoff {
    fn new() -> Self {
        Self { backoff_us: MIN_BACKOFF_US }
    }

    fn wait(&mut self) {
        if self.backoff_us <= MIN_BACKOFF_US {
            std::thread::yield_now();
        } else {
            std::thread::sleep(Duration::from_micros(self.backoff_us));
        }
        self.backoff_us = (self.backoff_us * 2).min(MAX_BACKOFF_US);
    }

    /// Back off, but never sleep past `deadline`.
    fn wait_until(&mut self, deadline: Instant) {
        if self.backoff_us <= MIN_BACKOFF_US {
            std::thread::yield_now();
        } else {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let nap = Duration::from_micros(self.backoff_us).min(remaining);
            if !nap.is_zero() {
                std::thread::sleep(nap);
            }
        }
        self.backoff_us = (self.backoff_us * 2).min(MAX_BACKOFF_US);
    }
}
