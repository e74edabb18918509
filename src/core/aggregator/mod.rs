//! # Aggregator Module
//!
//! Folds the unordered outcome stream into the run's report model and
//! promotes actual images to expected when updating.
//!
//! Every collection in [`AggregateResult`] is ordered (`BTreeSet` /
//! `BTreeMap`), so the result is identical for any completion order.

mod update;

pub use update::{UpdatePlan, UpdateProtocol, UpdateSummary};

use crate::core::config::DiffFormat;
use crate::core::scanner::{ImagePath, ImageSet};
use crate::core::worker::{DiffDetails, DiffOutcome};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Final report model of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub passed_items: BTreeSet<ImagePath>,
    pub failed_items: BTreeSet<ImagePath>,
    pub new_items: BTreeSet<ImagePath>,
    pub deleted_items: BTreeSet<ImagePath>,
    /// Failed images renamed to their diff artifact
    pub diff_items: BTreeSet<ImagePath>,
    pub expected_items: BTreeSet<ImagePath>,
    pub actual_items: BTreeSet<ImagePath>,
    #[serde(default)]
    pub diff_details: BTreeMap<ImagePath, DiffDetails>,
    #[serde(default)]
    pub errors: BTreeMap<ImagePath, String>,
}

impl AggregateResult {
    /// Whether the run saw a change that counts as a failure
    pub fn has_failures(&self, extended_errors: bool) -> bool {
        !self.failed_items.is_empty()
            || (extended_errors && (!self.new_items.is_empty() || !self.deleted_items.is_empty()))
    }

    /// Outcomes reconstructed from the result, sorted by image
    pub fn outcomes(&self) -> Vec<DiffOutcome> {
        let passed = self.passed_items.iter().map(|image| (image, true));
        let failed = self.failed_items.iter().map(|image| (image, false));
        let mut outcomes: Vec<DiffOutcome> = passed
            .chain(failed)
            .map(|(image, passed)| DiffOutcome {
                image: image.clone(),
                passed,
                diff_details: self.diff_details.get(image).cloned(),
                error: self.errors.get(image).cloned(),
            })
            .collect();
        outcomes.sort_by(|a, b| a.image.cmp(&b.image));
        outcomes
    }
}

/// Classifies outcomes against the run's image set
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator {
    update: bool,
    diff_format: DiffFormat,
}

impl ResultAggregator {
    pub fn new(update: bool, diff_format: DiffFormat) -> Self {
        Self {
            update,
            diff_format,
        }
    }

    pub fn aggregate(
        &self,
        outcomes: impl IntoIterator<Item = DiffOutcome>,
        images: &ImageSet,
    ) -> AggregateResult {
        let mut result = AggregateResult {
            new_items: images.new_images().into_iter().collect(),
            deleted_items: images.deleted_images().into_iter().collect(),
            actual_items: images.actual.iter().cloned().collect(),
            ..Default::default()
        };

        // Pre-run snapshot; never re-read after promotion
        result.expected_items = if self.update {
            result.actual_items.clone()
        } else {
            images.expected.iter().cloned().collect()
        };

        for outcome in outcomes {
            if let Some(details) = outcome.diff_details {
                result.diff_details.insert(outcome.image.clone(), details);
            }
            if let Some(error) = outcome.error {
                result.errors.insert(outcome.image.clone(), error);
            }
            if outcome.passed {
                result.passed_items.insert(outcome.image);
            } else {
                result
                    .diff_items
                    .insert(outcome.image.with_extension(self.diff_format.extension()));
                result.failed_items.insert(outcome.image);
            }
        }

        result
    }
}
