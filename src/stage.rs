//! Pipeline stages.
//!
//! A [`PipelineStage`] drains an input [`QueueGroup`], applies a per-item
//! transform (or a terminal sink action), and publishes results to an output
//! group. Stages propagate completion downstream and honor cooperative
//! cancellation at every take/add boundary.
//!
//! # State machine
//!
//! ```text
//! Idle ──run()──▶ Running ──input drained──▶ Draining ──▶ Completed
//!                    │
//!                    └──cancel token──▶ Cancelled (absorbing)
//! ```
//!
//! # Failure policy
//!
//! A transform error for one item is recorded as a [`StageFailure`] and the
//! stage moves on to the next item; the failures are aggregated in the
//! [`StageReport`]. A queue plumbing violation (publishing into an output
//! group whose members are all complete) is fatal and surfaces as
//! [`ConveyorError::Plumbing`].

use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::errors::{ConveyorError, Result};
use crate::group::{GroupAddError, GroupTakeOutcome, QueueGroup};
use crate::progress::ProgressTracker;

/// Error type produced by transforms and sink actions.
pub type TransformError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Lifecycle states of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StageState {
    /// Constructed, `run` not yet called.
    Idle = 0,
    /// Main loop is taking and processing items.
    Running = 1,
    /// Input drained; flushing and propagating completion.
    Draining = 2,
    /// Completion propagated downstream; the stage is done.
    Completed = 3,
    /// The cancellation token fired; absorbing.
    Cancelled = 4,
}

impl StageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StageState::Idle,
            1 => StageState::Running,
            2 => StageState::Draining,
            3 => StageState::Completed,
            4 => StageState::Cancelled,
            _ => unreachable!("invalid stage state {value}"),
        }
    }
}

/// Shared, observable stage state.
///
/// The stage updates this as it moves through its lifecycle; other threads
/// (tests, monitors) read it without synchronizing with the stage.
#[derive(Debug)]
pub struct StageStateCell(AtomicU8);

impl StageStateCell {
    fn new() -> Self {
        Self(AtomicU8::new(StageState::Idle as u8))
    }

    /// Read the current state.
    #[must_use]
    pub fn get(&self) -> StageState {
        StageState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: StageState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// One recorded per-item transform failure.
#[derive(Debug, Clone)]
pub struct StageFailure {
    /// Name of the stage the failure occurred in.
    pub stage: String,
    /// Ordinal of the failing item within the stage's input (1-based).
    pub item_ordinal: u64,
    /// Error text from the transform.
    pub detail: String,
}

/// Summary returned by [`PipelineStage::run`].
#[derive(Debug)]
pub struct StageReport {
    /// Stage name.
    pub name: String,
    /// Final state (`Completed` or `Cancelled`).
    pub state: StageState,
    /// Items taken from the input group.
    pub processed: u64,
    /// Items published to the output group (zero for sinks).
    pub emitted: u64,
    /// Per-item transform failures, in input order.
    pub failures: Vec<StageFailure>,
}

/// Tuning knobs for a stage's main loop.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Bounded-wait timeout for each input poll. Short enough that
    /// cancellation is noticed promptly.
    pub poll_timeout: Duration,
    /// Log a stall warning every this many consecutive empty polls.
    pub stall_warn_after: u32,
    /// Progress log interval for sink stages (items).
    pub progress_interval: u64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(50),
            stall_warn_after: 20,
            progress_interval: 10_000,
        }
    }
}

impl StageConfig {
    /// Set the input poll timeout.
    #[must_use]
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Set the consecutive-miss count between stall warnings.
    ///
    /// # Panics
    ///
    /// Panics if `stall_warn_after` is zero.
    #[must_use]
    pub fn with_stall_warn_after(mut self, stall_warn_after: u32) -> Self {
        assert!(stall_warn_after >= 1, "stall_warn_after must be at least 1");
        self.stall_warn_after = stall_warn_after;
        self
    }

    /// Set the sink progress log interval.
    ///
    /// # Panics
    ///
    /// Panics if `progress_interval` is zero.
    #[must_use]
    pub fn with_progress_interval(mut self, progress_interval: u64) -> Self {
        assert!(progress_interval >= 1, "progress_interval must be at least 1");
        self.progress_interval = progress_interval;
        self
    }
}

enum StageKind<I, O> {
    Transform {
        output: Arc<QueueGroup<O>>,
        apply: Box<dyn FnMut(I) -> std::result::Result<Vec<O>, TransformError> + Send>,
    },
    Sink {
        consume: Box<dyn FnMut(I) -> std::result::Result<(), TransformError> + Send>,
    },
}

/// One stage of a pipeline: input group in, transform or sink action, output
/// group out.
///
/// The input group is shared with the upstream stage that feeds it; the
/// output group is shared with the downstream stage that drains it. Stages
/// never synchronize with each other except through queue backpressure,
/// completion, and the shared cancellation token.
///
/// # Example
///
/// ```
/// use conveyor::{CancelToken, PipelineStage, QueueGroup};
/// use std::sync::Arc;
///
/// let input: Arc<QueueGroup<u32>> = Arc::new(QueueGroup::new(2, 16));
/// let output: Arc<QueueGroup<u64>> = Arc::new(QueueGroup::new(2, 16));
/// let cancel = CancelToken::new();
///
/// let mut doubler = PipelineStage::transform(
///     "doubler",
///     Arc::clone(&input),
///     Arc::clone(&output),
///     cancel.clone(),
///     |n: u32| Ok(vec![u64::from(n) * 2]),
/// );
///
/// input.add_to_any(21, &cancel).unwrap();
/// input.complete_all();
/// let report = doubler.run().unwrap();
/// assert_eq!(report.processed, 1);
/// ```
pub struct PipelineStage<I, O> {
    name: String,
    input: Arc<QueueGroup<I>>,
    kind: StageKind<I, O>,
    cancel: CancelToken,
    config: StageConfig,
    state: Arc<StageStateCell>,
}

impl<I, O> PipelineStage<I, O> {
    /// Create a transforming stage that publishes into `output`.
    ///
    /// The transform maps one input item to zero, one, or many outputs.
    pub fn transform<F>(
        name: impl Into<String>,
        input: Arc<QueueGroup<I>>,
        output: Arc<QueueGroup<O>>,
        cancel: CancelToken,
        apply: F,
    ) -> Self
    where
        F: FnMut(I) -> std::result::Result<Vec<O>, TransformError> + Send + 'static,
    {
        Self {
            name: name.into(),
            input,
            kind: StageKind::Transform { output, apply: Box::new(apply) },
            cancel,
            config: StageConfig::default(),
            state: Arc::new(StageStateCell::new()),
        }
    }

    /// Replace the stage configuration.
    #[must_use]
    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle for observing the stage's live state from other threads.
    #[must_use]
    pub fn state_handle(&self) -> Arc<StageStateCell> {
        Arc::clone(&self.state)
    }

    /// Drive the stage until its input drains, cancellation fires, or a
    /// plumbing failure occurs.
    ///
    /// Per-item transform failures do not stop the stage; they are collected
    /// into the returned [`StageReport`]. Cancellation is not an error: the
    /// report comes back with [`StageState::Cancelled`].
    ///
    /// # Errors
    ///
    /// [`ConveyorError::Plumbing`] if the output group closes while this
    /// stage still has items to publish.
    pub fn run(&mut self) -> Result<StageReport> {
        let PipelineStage { name, input, kind, cancel, config, state } = self;
        state.set(StageState::Running);
        debug!("stage '{name}' running");

        let progress = match kind {
            StageKind::Sink { .. } => Some(
                ProgressTracker::new(format!("stage '{name}' consumed"))
                    .with_interval(config.progress_interval),
            ),
            StageKind::Transform { .. } => None,
        };

        let mut processed: u64 = 0;
        let mut emitted: u64 = 0;
        let mut failures: Vec<StageFailure> = Vec::new();
        let mut misses: u32 = 0;

        let final_state = 'run: loop {
            match input.take_from_any(config.poll_timeout, cancel) {
                GroupTakeOutcome::Item { item, .. } => {
                    misses = 0;
                    processed += 1;
                    match kind {
                        StageKind::Transform { output, apply } => match apply(item) {
                            Ok(outputs) => {
                                for out in outputs {
                                    match output.add_to_any(out, cancel) {
                                        Ok(_) => emitted += 1,
                                        Err(GroupAddError::Cancelled(_)) => {
                                            break 'run StageState::Cancelled;
                                        }
                                        Err(GroupAddError::AllClosed(_)) => {
                                            return Err(ConveyorError::Plumbing {
                                                stage: name.clone(),
                                                detail: "output group closed while items \
                                                         remained to publish"
                                                    .to_string(),
                                            });
                                        }
                                        Err(GroupAddError::Timeout(_)) => {
                                            unreachable!("add_to_any has no deadline")
                                        }
                                    }
                                }
                            }
                            Err(err) => {
                                debug!("stage '{name}': item {processed} failed: {err}");
                                failures.push(StageFailure {
                                    stage: name.clone(),
                                    item_ordinal: processed,
                                    detail: err.to_string(),
                                });
                            }
                        },
                        StageKind::Sink { consume } => match consume(item) {
                            Ok(()) => {
                                if let Some(progress) = &progress {
                                    progress.record(1);
                                }
                            }
                            Err(err) => {
                                debug!("stage '{name}': item {processed} failed: {err}");
                                failures.push(StageFailure {
                                    stage: name.clone(),
                                    item_ordinal: processed,
                                    detail: err.to_string(),
                                });
                            }
                        },
                    }
                }
                GroupTakeOutcome::TimedOut => {
                    // Transient by policy: an empty-but-open input means a slow
                    // upstream, not a fault. Warn periodically so a stalled
                    // pipeline is visible in the logs.
                    misses += 1;
                    if misses % config.stall_warn_after == 0 {
                        warn!(
                            "stage '{name}': no input after {misses} consecutive polls; \
                             input depths {:?}",
                            input.depths()
                        );
                    }
                }
                GroupTakeOutcome::Cancelled => break 'run StageState::Cancelled,
                GroupTakeOutcome::Drained => {
                    state.set(StageState::Draining);
                    debug!("stage '{name}' draining");
                    if let StageKind::Transform { output, .. } = kind {
                        output.complete_all();
                    }
                    if let Some(progress) = &progress {
                        progress.log_final();
                    }
                    break 'run StageState::Completed;
                }
            }
        };

        state.set(final_state);
        match final_state {
            StageState::Completed => info!(
                "stage '{name}' completed: {processed} in, {emitted} out, {} failed",
                failures.len()
            ),
            StageState::Cancelled => info!("stage '{name}' cancelled after {processed} items"),
            _ => {}
        }

        Ok(StageReport { name: name.clone(), state: final_state, processed, emitted, failures })
    }
}

impl<I> PipelineStage<I, ()> {
    /// Create a terminal sink stage with no output group.
    ///
    /// The action consumes each item (write, accumulate, render); completion
    /// of the input group completes the stage.
    pub fn sink<F>(
        name: impl Into<String>,
        input: Arc<QueueGroup<I>>,
        cancel: CancelToken,
        consume: F,
    ) -> Self
    where
        F: FnMut(I) -> std::result::Result<(), TransformError> + Send + 'static,
    {
        Self {
            name: name.into(),
            input,
            kind: StageKind::Sink { consume: Box::new(consume) },
            cancel,
            config: StageConfig::default(),
            state: Arc::new(StageStateCell::new()),
        }
    }
}
