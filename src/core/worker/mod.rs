//! # Worker Module
//!
//! The per-image diff algorithm.
//!
//! ## Steps
//! 1. Digest both files; identical bytes pass without a pixel comparison
//!    and without a diff artifact
//! 2. Otherwise run the pixel comparator, which writes the diff artifact
//! 3. Decide pass/fail through [`DiffThresholds::decide`]
//!
//! Whatever happens (unreadable file, corrupt image, comparator panic), the
//! task is answered with a `DiffOutcome`. Failures become `passed = false`
//! with `error` set.
//!
//! [`DiffThresholds::decide`]: crate::core::config::DiffThresholds::decide

pub mod protocol;
mod task;

pub use task::{DiffDetails, DiffOutcome, DiffTask};

use crate::core::comparator::{default_comparator, PixelComparator};
use crate::core::hasher::ContentDigest;
use crate::error::DiffError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs diff tasks against a pixel comparator
#[derive(Clone)]
pub struct DiffWorker {
    comparator: Arc<dyn PixelComparator>,
}

impl DiffWorker {
    pub fn new(comparator: Arc<dyn PixelComparator>) -> Self {
        Self { comparator }
    }

    /// Execute one task. Never fails and never panics.
    pub fn run(&self, task: &DiffTask) -> DiffOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.try_run(task))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => {
                warn!(image = %task.image, %error, "diff failed");
                DiffOutcome::failed_with_error(task.image.clone(), error.to_string())
            }
            Err(payload) => {
                let error = DiffError::Panicked {
                    reason: panic_reason(payload.as_ref()),
                };
                warn!(image = %task.image, %error, "comparator panicked");
                DiffOutcome::failed_with_error(task.image.clone(), error.to_string())
            }
        }
    }

    fn try_run(&self, task: &DiffTask) -> Result<DiffOutcome, DiffError> {
        let actual = task.actual_path();
        let expected = task.expected_path();

        if ContentDigest::of_file(&actual)? == ContentDigest::of_file(&expected)? {
            debug!(image = %task.image, "identical bytes, skipping pixel comparison");
            return Ok(DiffOutcome::identical(task.image.clone()));
        }

        let diff_path = task.diff_path();
        if let Some(parent) = diff_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DiffError::WriteArtifact {
                path: parent.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let pixels = self
            .comparator
            .compare(&actual, &expected, &diff_path, &task.compare_options())?;
        let passed = task
            .thresholds
            .decide(pixels.diff_count, pixels.width, pixels.height);

        debug!(
            image = %task.image,
            comparator = self.comparator.name(),
            diff_count = pixels.diff_count,
            passed,
            "compared"
        );

        Ok(DiffOutcome {
            image: task.image.clone(),
            passed,
            diff_details: Some(pixels.into()),
            error: None,
        })
    }
}

impl Default for DiffWorker {
    fn default() -> Self {
        Self::new(default_comparator())
    }
}

/// Message carried by a caught panic
pub(crate) fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
