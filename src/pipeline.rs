//! Pipeline orchestration.
//!
//! [`Pipeline`] spawns one OS thread per stage, joins them all, and folds the
//! per-stage results into a [`PipelineSummary`]. Stages synchronize with each
//! other only through their shared queue groups; the orchestrator's job is
//! thread lifecycle, panic containment, and error propagation.
//!
//! A stage that fails structurally (or panics) fires the shared cancellation
//! token from its own thread, so the remaining stages unblock at their next
//! take/add boundary and the final join cannot hang on a half-dead pipeline.

use log::{debug, warn};
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crate::cancel::CancelToken;
use crate::errors::{ConveyorError, Result};
use crate::stage::{PipelineStage, StageReport, StageState};

/// Extract a human-readable message from a panic payload.
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Aggregated results of a finished pipeline.
#[derive(Debug)]
pub struct PipelineSummary {
    /// One report per stage, in spawn order.
    pub reports: Vec<StageReport>,
}

impl PipelineSummary {
    /// Check whether every stage reached [`StageState::Completed`].
    #[must_use]
    pub fn all_completed(&self) -> bool {
        self.reports.iter().all(|r| r.state == StageState::Completed)
    }

    /// Check whether any stage was cancelled.
    #[must_use]
    pub fn any_cancelled(&self) -> bool {
        self.reports.iter().any(|r| r.state == StageState::Cancelled)
    }

    /// Total items processed across all stages.
    #[must_use]
    pub fn total_processed(&self) -> u64 {
        self.reports.iter().map(|r| r.processed).sum()
    }

    /// Total per-item transform failures across all stages.
    #[must_use]
    pub fn total_failures(&self) -> usize {
        self.reports.iter().map(|r| r.failures.len()).sum()
    }
}

/// Runs a set of stages, one thread each, and collects their reports.
///
/// # Example
///
/// ```no_run
/// use conveyor::{Pipeline, PipelineStage, QueueGroup};
/// use std::sync::Arc;
///
/// let source: Arc<QueueGroup<u32>> = Arc::new(QueueGroup::new(2, 64));
/// let mid: Arc<QueueGroup<u64>> = Arc::new(QueueGroup::new(2, 64));
///
/// let mut pipeline = Pipeline::new();
/// let cancel = pipeline.cancel_token();
///
/// pipeline
///     .spawn(PipelineStage::transform(
///         "doubler",
///         Arc::clone(&source),
///         Arc::clone(&mid),
///         cancel.clone(),
///         |n: u32| Ok(vec![u64::from(n) * 2]),
///     ))
///     .unwrap();
/// pipeline
///     .spawn(PipelineStage::sink("printer", mid, cancel.clone(), |n: u64| {
///         println!("{n}");
///         Ok(())
///     }))
///     .unwrap();
///
/// for i in 0..10 {
///     source.add_to_any(i, &cancel).unwrap();
/// }
/// source.complete_all();
///
/// let summary = pipeline.wait().unwrap();
/// assert!(summary.all_completed());
/// ```
pub struct Pipeline {
    cancel: CancelToken,
    handles: Vec<(String, thread::JoinHandle<Result<StageReport>>)>,
}

impl Pipeline {
    /// Create an empty pipeline with a fresh cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self { cancel: CancelToken::new(), handles: Vec::new() }
    }

    /// Clone out the shared cancellation token.
    ///
    /// Pass clones to the stages at construction and to whatever external
    /// trigger (signal handler, watchdog) may need to stop the pipeline.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request cooperative cancellation of every stage.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Spawn a stage on its own named thread.
    ///
    /// Panics inside the stage are contained and converted to
    /// [`ConveyorError::WorkerPanic`]; any structural failure fires the
    /// shared cancellation token so sibling stages wind down instead of
    /// blocking forever on a dead neighbor.
    ///
    /// # Errors
    ///
    /// [`ConveyorError::Spawn`] if the OS refuses the thread.
    pub fn spawn<I, O>(&mut self, mut stage: PipelineStage<I, O>) -> Result<()>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        let name = stage.name().to_string();
        let cancel = self.cancel.clone();
        let thread_name = format!("stage-{name}");
        let handle = thread::Builder::new().name(thread_name).spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| stage.run()));
            let result = match result {
                Ok(run_result) => run_result,
                Err(payload) => Err(ConveyorError::WorkerPanic(panic_message(payload))),
            };
            if let Err(err) = &result {
                warn!("stage failed, cancelling pipeline: {err}");
                cancel.cancel();
            }
            result
        })?;
        debug!("spawned stage '{name}'");
        self.handles.push((name, handle));
        Ok(())
    }

    /// Number of spawned stages still owned by this pipeline.
    #[must_use]
    pub fn num_stages(&self) -> usize {
        self.handles.len()
    }

    /// Join every stage and aggregate the results.
    ///
    /// All stages are joined before any error is returned, so no stage
    /// thread outlives this call.
    ///
    /// # Errors
    ///
    /// The first structural failure ([`ConveyorError::Plumbing`],
    /// [`ConveyorError::WorkerPanic`]) observed across the stages, in spawn
    /// order. Cancellation and per-item transform failures are not errors;
    /// they are visible in the summary's reports.
    pub fn wait(self) -> Result<PipelineSummary> {
        let Pipeline { cancel, handles } = self;
        let mut reports = Vec::with_capacity(handles.len());
        let mut first_error: Option<ConveyorError> = None;

        for (name, handle) in handles {
            let result = match handle.join() {
                Ok(result) => result,
                // The spawned closure contains panics, so a join error means
                // the containment itself died; treat it the same way.
                Err(payload) => Err(ConveyorError::WorkerPanic(panic_message(payload))),
            };
            match result {
                Ok(report) => reports.push(report),
                Err(err) => {
                    warn!("stage '{name}' failed: {err}");
                    cancel.cancel();
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(PipelineSummary { reports }),
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
