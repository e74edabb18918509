//! Task and outcome records exchanged with workers.

use crate::core::comparator::{CompareOptions, PixelDiff};
use crate::core::config::{diff_ratio, DiffFormat, DiffThresholds};
use crate::core::scanner::ImagePath;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unit of work handed to exactly one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffTask {
    pub image: ImagePath,
    pub actual_dir: PathBuf,
    pub expected_dir: PathBuf,
    pub diff_dir: PathBuf,
    #[serde(flatten)]
    pub thresholds: DiffThresholds,
    #[serde(default)]
    pub diff_format: DiffFormat,
}

impl DiffTask {
    pub fn actual_path(&self) -> PathBuf {
        self.image.resolve(&self.actual_dir)
    }

    pub fn expected_path(&self) -> PathBuf {
        self.image.resolve(&self.expected_dir)
    }

    /// Where the diff artifact goes: the image path under the diff root,
    /// with the extension swapped for the diff format.
    pub fn diff_path(&self) -> PathBuf {
        self.image
            .with_extension(self.diff_format.extension())
            .resolve(&self.diff_dir)
    }

    pub fn compare_options(&self) -> CompareOptions {
        CompareOptions {
            threshold: self.thresholds.matching_threshold,
            include_anti_alias: !self.thresholds.enable_antialias,
        }
    }
}

/// Pixel statistics of a compared image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffDetails {
    pub width: u32,
    pub height: u32,
    pub diff_count: u64,
    /// Percentage (0 - 100) of differing pixels
    pub diff_percentage: f64,
}

impl From<PixelDiff> for DiffDetails {
    fn from(diff: PixelDiff) -> Self {
        Self {
            width: diff.width,
            height: diff.height,
            diff_count: diff.diff_count,
            diff_percentage: diff_ratio(diff.diff_count, diff.width, diff.height) * 100.0,
        }
    }
}

/// Verdict for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffOutcome {
    pub image: ImagePath,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub diff_details: Option<DiffDetails>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl DiffOutcome {
    /// Byte-identical images: passed without a pixel comparison
    pub fn identical(image: ImagePath) -> Self {
        Self {
            image,
            passed: true,
            diff_details: None,
            error: None,
        }
    }

    /// Image that could not be compared
    pub fn failed_with_error(image: ImagePath, error: String) -> Self {
        Self {
            image,
            passed: false,
            diff_details: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(image: &str) -> DiffTask {
        DiffTask {
            image: ImagePath::new(image),
            actual_dir: PathBuf::from("/run/actual"),
            expected_dir: PathBuf::from("/run/expected"),
            diff_dir: PathBuf::from("/run/diff"),
            thresholds: DiffThresholds::default(),
            diff_format: DiffFormat::Png,
        }
    }

    #[test]
    fn paths_resolve_under_each_root() {
        let task = task("menu/open.jpg");
        assert_eq!(task.actual_path(), PathBuf::from("/run/actual/menu/open.jpg"));
        assert_eq!(task.expected_path(), PathBuf::from("/run/expected/menu/open.jpg"));
        assert_eq!(task.diff_path(), PathBuf::from("/run/diff/menu/open.png"));
    }

    #[test]
    fn antialias_flag_inverts_into_include_option() {
        let mut task = task("a.png");
        assert!(task.compare_options().include_anti_alias);
        task.thresholds.enable_antialias = true;
        assert!(!task.compare_options().include_anti_alias);
    }

    #[test]
    fn details_compute_percentage() {
        let details = DiffDetails::from(PixelDiff {
            width: 10,
            height: 10,
            diff_count: 25,
        });
        assert_eq!(details.diff_percentage, 25.0);
    }

    #[test]
    fn task_wire_format_is_flat_camel_case() {
        let json = serde_json::to_value(task("a.png")).unwrap();
        assert_eq!(json["image"], "a.png");
        assert_eq!(json["actualDir"], "/run/actual");
        assert_eq!(json["matchingThreshold"], 0.0);
        assert_eq!(json["diffFormat"], "png");
    }

    #[test]
    fn outcome_omits_absent_fields() {
        let json = serde_json::to_string(&DiffOutcome::identical(ImagePath::new("a.png"))).unwrap();
        assert_eq!(json, r#"{"image":"a.png","passed":true}"#);
    }
}
