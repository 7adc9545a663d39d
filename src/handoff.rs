//! Asynchronous completion-based hand-off queue.
//!
//! [`AsyncHandoffQueue`] lets a producer and a consumer rendezvous without
//! polling: a `take` that finds no data registers a claim and returns a
//! future that is resolved precisely when a matching `add` occurs. An `add`
//! that finds a pending claim hands its item straight to that claim's waker
//! instead of buffering.
//!
//! The core invariant: the buffered-item sequence and the live pending-claim
//! sequence are never both non-empty at a quiescent point. Every `add`
//! either satisfies the oldest live claim or buffers, never both.
//!
//! No cancellation or timeout exists at this layer; callers compose those
//! around the returned future. Dropping an unresolved [`TakeFuture`]
//! abandons its claim, and later adds skip abandoned claims.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

enum ClaimState<T> {
    /// Registered, not yet fulfilled. Holds the waker from the latest poll.
    Waiting(Option<Waker>),
    /// An `add` handed this claim an item; the future has not consumed it.
    Fulfilled(T),
    /// The future consumed the item.
    Taken,
    /// The future was dropped before fulfillment.
    Abandoned,
}

/// One pending take. Shared between the queue (to fulfill) and the future
/// (to poll); its own lock keeps fulfillment and polling from racing.
struct Claim<T> {
    state: Mutex<ClaimState<T>>,
}

impl<T> Claim<T> {
    fn waiting() -> Self {
        Self { state: Mutex::new(ClaimState::Waiting(None)) }
    }

    fn fulfilled(item: T) -> Self {
        Self { state: Mutex::new(ClaimState::Fulfilled(item)) }
    }

    /// Hand `item` to this claim, returning the waker to invoke.
    ///
    /// Fails with the item if the claim was abandoned, so the caller can try
    /// the next claim.
    fn fulfill(&self, item: T) -> std::result::Result<Option<Waker>, T> {
        let mut state = self.state.lock();
        match &mut *state {
            ClaimState::Waiting(waker) => {
                let waker = waker.take();
                *state = ClaimState::Fulfilled(item);
                Ok(waker)
            }
            ClaimState::Abandoned => Err(item),
            // A claim leaves the pending set before it is fulfilled, so it
            // can never be offered an item twice.
            ClaimState::Fulfilled(_) | ClaimState::Taken => {
                unreachable!("claim offered an item twice")
            }
        }
    }

    fn is_live(&self) -> bool {
        matches!(*self.state.lock(), ClaimState::Waiting(_))
    }
}

struct Inner<T> {
    buffered: VecDeque<T>,
    pending: VecDeque<Arc<Claim<T>>>,
}

/// An unbounded producer/consumer queue where takes and adds rendezvous.
///
/// [`add`](AsyncHandoffQueue::add) never blocks. [`take`](AsyncHandoffQueue::take)
/// never blocks the calling thread; when no item is buffered it returns an
/// unresolved [`TakeFuture`] the caller awaits or composes.
///
/// # Example
///
/// ```
/// use conveyor::AsyncHandoffQueue;
///
/// let queue = AsyncHandoffQueue::new();
/// queue.add(7);
/// let value = futures::executor::block_on(queue.take());
/// assert_eq!(value, 7);
/// ```
pub struct AsyncHandoffQueue<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> AsyncHandoffQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { buffered: VecDeque::new(), pending: VecDeque::new() }) }
    }

    /// Add an item: resolve the oldest live pending claim, or buffer.
    ///
    /// Never blocks. Wakes the claim's task outside the queue lock.
    pub fn add(&self, item: T) {
        let mut item = item;
        loop {
            let claim = {
                let mut inner = self.inner.lock();
                match inner.pending.pop_front() {
                    Some(claim) => claim,
                    None => {
                        inner.buffered.push_back(item);
                        return;
                    }
                }
            };
            match claim.fulfill(item) {
                Ok(waker) => {
                    if let Some(waker) = waker {
                        waker.wake();
                    }
                    return;
                }
                // Abandoned claim; retry with the next one.
                Err(rejected) => item = rejected,
            }
        }
    }

    /// Take an item: immediately resolved if one is buffered, otherwise a
    /// pending claim in FIFO order behind any earlier claims.
    ///
    /// Never blocks the calling thread; suspension, if any, happens at the
    /// await point of the returned future.
    pub fn take(&self) -> TakeFuture<T> {
        let mut inner = self.inner.lock();
        if let Some(item) = inner.buffered.pop_front() {
            TakeFuture { claim: Arc::new(Claim::fulfilled(item)) }
        } else {
            let claim = Arc::new(Claim::waiting());
            inner.pending.push_back(Arc::clone(&claim));
            TakeFuture { claim }
        }
    }

    /// Number of buffered, unclaimed items.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.inner.lock().buffered.len()
    }

    /// Number of live pending claims (abandoned claims are not counted; they
    /// are discarded lazily by later adds).
    #[must_use]
    pub fn pending_claims(&self) -> usize {
        self.inner.lock().pending.iter().filter(|claim| claim.is_live()).count()
    }
}

impl<T> Default for AsyncHandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for AsyncHandoffQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("AsyncHandoffQueue")
            .field("buffered", &inner.buffered.len())
            .field("pending", &inner.pending.len())
            .finish()
    }
}

/// Future returned by [`AsyncHandoffQueue::take`].
///
/// Resolves to the handed-off item. Dropping it before resolution abandons
/// the claim; a later `add` skips the abandoned slot and satisfies the next
/// live claim instead.
pub struct TakeFuture<T> {
    claim: Arc<Claim<T>>,
}

impl<T> Future for TakeFuture<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = self.claim.state.lock();
        match mem::replace(&mut *state, ClaimState::Taken) {
            ClaimState::Fulfilled(item) => Poll::Ready(item),
            ClaimState::Waiting(_) => {
                *state = ClaimState::Waiting(Some(cx.waker().clone()));
                Poll::Pending
            }
            ClaimState::Taken => panic!("TakeFuture polled after completion"),
            ClaimState::Abandoned => unreachable!("abandoned claim polled"),
        }
    }
}

impl<T> Drop for TakeFuture<T> {
    fn drop(&mut self) {
        let mut state = self.claim.state.lock();
        if matches!(*state, ClaimState::Waiting(_)) {
            *state = ClaimState::Abandoned;
        }
    }
}
