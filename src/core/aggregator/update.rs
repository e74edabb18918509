//! Promotion of actual images to expected.
//!
//! Strict order: every stale baseline is deleted before any actual image is
//! copied, and the summary is returned only after both steps finish.

use super::AggregateResult;
use crate::core::scanner::ImagePath;
use crate::error::UpdateError;
use glob::{glob, Pattern};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Files touched by a promotion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatePlan {
    /// Removed from the expected root: deleted and failed images
    pub delete: BTreeSet<ImagePath>,
    /// Copied from the actual root: new and failed images
    pub copy: BTreeSet<ImagePath>,
}

impl UpdatePlan {
    pub fn from_result(result: &AggregateResult) -> Self {
        Self {
            delete: result
                .deleted_items
                .union(&result.failed_items)
                .cloned()
                .collect(),
            copy: result.new_items.union(&result.failed_items).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.copy.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub deleted: usize,
    pub copied: usize,
}

/// Executes an [`UpdatePlan`] between two roots
#[derive(Debug, Clone)]
pub struct UpdateProtocol {
    actual_dir: PathBuf,
    expected_dir: PathBuf,
}

impl UpdateProtocol {
    pub fn new(actual_dir: impl Into<PathBuf>, expected_dir: impl Into<PathBuf>) -> Self {
        Self {
            actual_dir: actual_dir.into(),
            expected_dir: expected_dir.into(),
        }
    }

    pub fn execute(&self, plan: &UpdatePlan) -> Result<UpdateSummary, UpdateError> {
        let mut deleted = 0;
        for image in &plan.delete {
            deleted += self.delete(image)?;
        }
        debug!(deleted, "stale baselines removed");

        let copied = plan
            .copy
            .par_iter()
            .map(|image| self.copy(image))
            .collect::<Result<Vec<()>, UpdateError>>()?
            .len();

        info!(deleted, copied, "expected images updated");
        Ok(UpdateSummary { deleted, copied })
    }

    /// Remove the baseline of one image. File names are escaped so that
    /// `[`, `*` and `?` match literally. A missing file is not an error.
    fn delete(&self, image: &ImagePath) -> Result<usize, UpdateError> {
        let pattern = escaped_pattern(&self.expected_dir, image);
        let entries = glob(&pattern).map_err(|e| UpdateError::Pattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;

        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(|e| UpdateError::Delete {
                path: e.path().to_path_buf(),
                source: e.into_error(),
            })?;
            fs::remove_file(&path).map_err(|source| UpdateError::Delete {
                path: path.clone(),
                source,
            })?;
            removed += 1;
        }
        Ok(removed)
    }

    fn copy(&self, image: &ImagePath) -> Result<(), UpdateError> {
        let from = image.resolve(&self.actual_dir);
        let to = image.resolve(&self.expected_dir);

        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|source| UpdateError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::copy(&from, &to).map_err(|source| UpdateError::Copy { from, to, source })?;
        Ok(())
    }
}

fn escaped_pattern(root: &Path, image: &ImagePath) -> String {
    format!(
        "{}/{}",
        Pattern::escape(&root.to_string_lossy()),
        Pattern::escape(image.as_str())
    )
}
