#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args
)]

//! # conveyor - bounded multi-queue pipelines
//!
//! Building blocks for moving data through sequential transformation stages
//! with backpressure and cooperative cancellation, plus a completion-based
//! hand-off queue for producer/consumer rendezvous without polling.
//!
//! ## Architecture
//!
//! ```text
//! producers ──▶ QueueGroup<A> ──▶ PipelineStage ──▶ QueueGroup<B> ──▶ ... ──▶ sink stage
//!               (N bounded        (transform,        (owned by the
//!                member queues)    one thread)        feeding stage)
//! ```
//!
//! - **[`queue::BoundedQueue`]** - fixed-capacity, thread-safe FIFO with
//!   blocking put/take, timeouts, and a one-way "no more input" signal.
//! - **[`group::QueueGroup`]** - a fixed set of bounded queues addressed as
//!   one logical channel; fan-out "add to any" and fan-in "take from any"
//!   distribute contention across members.
//! - **[`stage::PipelineStage`]** - consumes from an input group, applies a
//!   transform or terminal action per item, publishes to an output group,
//!   and propagates completion and cancellation.
//! - **[`pipeline::Pipeline`]** - spawns one thread per stage, contains
//!   panics, and aggregates per-stage reports.
//! - **[`handoff::AsyncHandoffQueue`]** - unbounded rendezvous queue whose
//!   `take` returns a future resolved exactly when a matching `add` occurs.
//!
//! ## Quick start
//!
//! ```
//! use conveyor::{Pipeline, PipelineStage, QueueGroup};
//! use std::sync::{Arc, Mutex};
//!
//! let source: Arc<QueueGroup<i32>> = Arc::new(QueueGroup::new(2, 64));
//! let doubled: Arc<QueueGroup<i32>> = Arc::new(QueueGroup::new(2, 64));
//! let sums = Arc::new(Mutex::new(0));
//!
//! let mut pipeline = Pipeline::new();
//! let cancel = pipeline.cancel_token();
//!
//! pipeline.spawn(PipelineStage::transform(
//!     "double",
//!     Arc::clone(&source),
//!     Arc::clone(&doubled),
//!     cancel.clone(),
//!     |n: i32| Ok(vec![n * 2]),
//! )).unwrap();
//!
//! let sink_sums = Arc::clone(&sums);
//! pipeline.spawn(PipelineStage::sink(
//!     "sum",
//!     doubled,
//!     cancel.clone(),
//!     move |n: i32| {
//!         *sink_sums.lock().unwrap() += n;
//!         Ok(())
//!     },
//! )).unwrap();
//!
//! for n in [1, 2, 3] {
//!     source.add_to_any(n, &cancel).unwrap();
//! }
//! source.complete_all();
//!
//! let summary = pipeline.wait().unwrap();
//! assert!(summary.all_completed());
//! assert_eq!(*sums.lock().unwrap(), 12);
//! ```

pub mod cancel;
pub mod errors;
pub mod group;
pub mod handoff;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod stage;

pub use cancel::CancelToken;
pub use errors::{ConveyorError, Result};
pub use group::{GroupAddError, GroupTakeOutcome, QueueGroup};
pub use handoff::{AsyncHandoffQueue, TakeFuture};
pub use pipeline::{Pipeline, PipelineSummary};
pub use queue::{AddError, BoundedQueue, QueueStats, TakeOutcome};
pub use stage::{PipelineStage, StageConfig, StageFailure, StageReport, StageState};
