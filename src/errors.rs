//! Custom error types for conveyor operations.

use thiserror::Error;

/// Result type alias for conveyor operations
pub type Result<T> = std::result::Result<T, ConveyorError>;

/// Structural errors for conveyor operations.
///
/// Only failures that are fatal to a stage live here. Recoverable conditions
/// are expressed as values instead: a rejected add hands the item back through
/// [`AddError`](crate::queue::AddError) or
/// [`GroupAddError`](crate::group::GroupAddError), and bounded-wait takes
/// report timeouts through [`TakeOutcome`](crate::queue::TakeOutcome) and
/// [`GroupTakeOutcome`](crate::group::GroupTakeOutcome). Per-item transform
/// failures are collected in [`StageReport`](crate::stage::StageReport)
/// without stopping the stage.
#[derive(Error, Debug)]
pub enum ConveyorError {
    /// Queue plumbing violated an invariant (e.g. the output group closed
    /// while a stage still had items to publish). Fatal to the stage.
    #[error("stage '{stage}': {detail}")]
    Plumbing {
        /// Name of the stage that hit the failure
        stage: String,
        /// Explanation of the violated invariant
        detail: String,
    },

    /// A stage thread panicked; the payload message is preserved.
    #[error("worker thread panicked: {0}")]
    WorkerPanic(String),

    /// The OS refused to spawn a stage thread.
    #[error("failed to spawn stage thread: {0}")]
    Spawn(#[from] std::io::Error),
}
