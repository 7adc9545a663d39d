//! Shared helpers for the integration tests.

use conveyor::group::GroupTakeOutcome;
use conveyor::{CancelToken, QueueGroup};
use std::time::Duration;

/// Drain a completed group, returning every remaining item.
///
/// Panics on a timeout so a test that forgot to complete the group fails
/// fast instead of hanging.
pub fn drain_group<T: std::fmt::Debug>(group: &QueueGroup<T>, cancel: &CancelToken) -> Vec<T> {
    let mut items = Vec::new();
    loop {
        match group.take_from_any(Duration::from_secs(5), cancel) {
            GroupTakeOutcome::Item { item, .. } => items.push(item),
            GroupTakeOutcome::Drained => return items,
            other => panic!("group did not drain: {other:?}"),
        }
    }
}

/// Opt into log output with `RUST_LOG=debug cargo test -- --nocapture`.
#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default()).is_test(true).try_init();
}
