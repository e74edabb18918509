//! Seam between the scheduler and the execution units it drives.

use crate::core::worker::{DiffOutcome, DiffTask};
use crate::error::PoolError;
use std::sync::Arc;

/// Kills a unit from outside the thread that drives it. Must be idempotent.
pub type Terminator = Arc<dyn Fn() + Send + Sync>;

/// Creates execution units
pub trait WorkerBackend: Send + Sync + 'static {
    type Unit: WorkerUnit;

    /// Backend name for logs and events
    fn name(&self) -> &'static str;

    /// Start the unit with the given slot index
    fn spawn(&self, worker: usize) -> Result<Self::Unit, PoolError>;
}

/// One isolated execution unit. Runs one task at a time.
pub trait WorkerUnit: Send + 'static {
    /// Run a task to completion. Per-image failures come back as an
    /// `Ok` outcome; `Err` means the unit itself failed.
    fn execute(&mut self, task: &DiffTask) -> Result<DiffOutcome, PoolError>;

    /// Stop the unit and release its resources
    fn terminate(&mut self);

    /// Handle that terminates this unit from another thread
    fn terminator(&self) -> Terminator;
}

/// Errors after which a unit can no longer be trusted with another task
pub(crate) fn is_fatal_to_unit(error: &PoolError) -> bool {
    matches!(
        error,
        PoolError::Timeout { .. } | PoolError::WorkerExited { .. } | PoolError::Protocol { .. }
    )
}
