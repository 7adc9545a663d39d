//! Hand-off queue tests: rendezvous, FIFO claims, and the buffered/pending
//! exclusion invariant.

use conveyor::AsyncHandoffQueue;
use futures::executor::block_on;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// The canonical scenario: a take with no data obtains a pending future,
/// then `add(7)` resolves it and the buffer stays empty.
#[test]
fn test_take_then_add_rendezvous() {
    let queue = AsyncHandoffQueue::new();

    let pending = queue.take();
    assert_eq!(queue.pending_claims(), 1);
    assert_eq!(queue.buffered_len(), 0);

    queue.add(7);
    assert_eq!(block_on(pending), 7);
    assert_eq!(queue.buffered_len(), 0);
    assert_eq!(queue.pending_claims(), 0);
}

/// Adds with no waiting consumer buffer in FIFO order.
#[test]
fn test_adds_buffer_in_fifo_order() {
    let queue = AsyncHandoffQueue::new();
    for i in 0..5 {
        queue.add(i);
    }
    assert_eq!(queue.buffered_len(), 5);

    for expected in 0..5 {
        assert_eq!(block_on(queue.take()), expected);
    }
    assert_eq!(queue.buffered_len(), 0);
}

/// Producer and consumer on different threads rendezvous without loss.
#[test]
fn test_threaded_producer_consumer() {
    const ITEMS: u64 = 1_000;

    let queue: Arc<AsyncHandoffQueue<u64>> = Arc::new(AsyncHandoffQueue::new());

    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut total = 0u64;
            for _ in 0..ITEMS {
                total += block_on(queue.take());
            }
            total
        })
    };

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for i in 1..=ITEMS {
                queue.add(i);
                if i % 64 == 0 {
                    // Let the consumer catch up so both rendezvous paths
                    // (buffered and pending-claim) get exercised.
                    thread::sleep(Duration::from_micros(100));
                }
            }
        })
    };

    producer.join().unwrap();
    assert_eq!(consumer.join().unwrap(), ITEMS * (ITEMS + 1) / 2);
    assert_eq!(queue.buffered_len(), 0);
    assert_eq!(queue.pending_claims(), 0);
}

/// Two consumers' claims resolve in the order they were registered.
#[test]
fn test_claims_are_fifo_across_threads() {
    let queue: Arc<AsyncHandoffQueue<u32>> = Arc::new(AsyncHandoffQueue::new());

    let first = queue.take();
    let second = queue.take();
    assert_eq!(queue.pending_claims(), 2);

    queue.add(10);
    queue.add(20);

    assert_eq!(block_on(first), 10);
    assert_eq!(block_on(second), 20);
}

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    // Property: after every operation of an arbitrary add/take interleaving,
    // the buffered sequence and the live pending claims are never both
    // non-empty, and every item added is delivered to exactly one claim or
    // buffered slot.
    proptest! {
        #[test]
        fn proptest_handoff_exclusion_invariant(ops in prop::collection::vec(any::<bool>(), 1..200)) {
            let queue = AsyncHandoffQueue::new();
            let mut pending = Vec::new();
            let mut next_item = 0u64;
            let mut delivered = Vec::new();

            for is_add in ops {
                if is_add {
                    queue.add(next_item);
                    next_item += 1;
                } else {
                    pending.push(queue.take());
                }

                // Resolve any claims that became ready, oldest first.
                while !pending.is_empty() && queue.pending_claims() < pending.len() {
                    delivered.push(block_on(pending.remove(0)));
                }

                prop_assert!(
                    queue.buffered_len() == 0 || queue.pending_claims() == 0,
                    "buffered {} and pending {} both non-empty",
                    queue.buffered_len(),
                    queue.pending_claims()
                );
            }

            // Drain: every added item is delivered exactly once overall.
            while !pending.is_empty() {
                queue.add(next_item);
                next_item += 1;
                delivered.push(block_on(pending.remove(0)));
            }
            while queue.buffered_len() > 0 {
                delivered.push(block_on(queue.take()));
            }

            prop_assert_eq!(delivered.len() as u64, next_item);
            let mut sorted = delivered.clone();
            sorted.sort_unstable();
            sorted.dedup();
            prop_assert_eq!(sorted.len() as u64, next_item, "duplicate or lost deliveries");
        }
    }
}
