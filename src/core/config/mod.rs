//! # Config Module
//!
//! Run configuration, normalized once before the engine starts.
//!
//! The legacy flags `threshold`, `thresholdRate` and `thresholdPixel`
//! overlap. They are folded into a single [`DiffThresholds`] value whose
//! [`DiffThresholds::decide`] is the only place the precedence lives:
//!
//! | Set                | Pass condition                      |
//! |--------------------|-------------------------------------|
//! | `threshold_pixel`  | `diff_count <= threshold_pixel`     |
//! | `threshold_rate`   | `diff_count / pixels <= rate`       |
//! | neither            | `diff_count == 0`                   |

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of workers
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Batches smaller than this run on a single worker
pub const SMALL_BATCH_THRESHOLD: usize = 20;

/// Default per-task timeout of the process backend
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Tolerances applied to one image comparison
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffThresholds {
    /// Per-pixel color distance (0.0 - 1.0) before a pixel counts as different
    pub matching_threshold: f32,
    /// Whole-image tolerance as a fraction of differing pixels
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub threshold_rate: Option<f64>,
    /// Whole-image tolerance as an absolute pixel count
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub threshold_pixel: Option<u64>,
    /// Exclude anti-aliased edge pixels from the diff count
    pub enable_antialias: bool,
}

impl DiffThresholds {
    /// Pass/fail decision for a comparison result
    pub fn decide(&self, diff_count: u64, width: u32, height: u32) -> bool {
        if let Some(limit) = self.threshold_pixel {
            diff_count <= limit
        } else if let Some(rate) = self.threshold_rate {
            diff_ratio(diff_count, width, height) <= rate
        } else {
            diff_count == 0
        }
    }
}

impl Default for DiffThresholds {
    fn default() -> Self {
        Self {
            matching_threshold: 0.0,
            threshold_rate: None,
            threshold_pixel: None,
            enable_antialias: false,
        }
    }
}

/// Fraction of differing pixels; an empty canvas has ratio 0.
pub fn diff_ratio(diff_count: u64, width: u32, height: u32) -> f64 {
    let pixels = u64::from(width) * u64::from(height);
    if pixels == 0 {
        return 0.0;
    }
    diff_count as f64 / pixels as f64
}

/// Builder folding the legacy threshold flags into [`DiffThresholds`]
#[derive(Debug, Clone, Default)]
pub struct ThresholdsBuilder {
    matching_threshold: Option<f32>,
    threshold: Option<f64>,
    threshold_rate: Option<f64>,
    threshold_pixel: Option<u64>,
    enable_antialias: bool,
}

impl ThresholdsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-pixel color distance tolerance
    pub fn matching_threshold(mut self, value: f32) -> Self {
        self.matching_threshold = Some(value);
        self
    }

    /// Legacy alias of `threshold_rate`
    pub fn threshold(mut self, value: f64) -> Self {
        self.threshold = Some(value);
        self
    }

    pub fn threshold_rate(mut self, value: f64) -> Self {
        self.threshold_rate = Some(value);
        self
    }

    pub fn threshold_pixel(mut self, value: u64) -> Self {
        self.threshold_pixel = Some(value);
        self
    }

    pub fn enable_antialias(mut self, value: bool) -> Self {
        self.enable_antialias = value;
        self
    }

    /// Resolve the flags. An explicit `threshold_rate` wins over the alias.
    pub fn build(self) -> Result<DiffThresholds, String> {
        let matching_threshold = self.matching_threshold.unwrap_or(0.0);
        if !(0.0..=1.0).contains(&matching_threshold) {
            return Err(format!(
                "matching threshold must be within 0..=1, got {matching_threshold}"
            ));
        }

        let threshold_rate = self.threshold_rate.or(self.threshold);
        if let Some(rate) = threshold_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(format!("threshold rate must be within 0..=1, got {rate}"));
            }
        }

        Ok(DiffThresholds {
            matching_threshold,
            threshold_rate,
            threshold_pixel: self.threshold_pixel,
            enable_antialias: self.enable_antialias,
        })
    }
}

/// Encoding of the diff artifacts written to the diff directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffFormat {
    #[default]
    Png,
    Webp,
}

impl DiffFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            DiffFormat::Png => "png",
            DiffFormat::Webp => "webp",
        }
    }
}

/// Which execution substrate runs the diff tasks
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Backend {
    /// In-process native core parallelized over the thread-spawn bridge
    #[default]
    Threads,
    /// One OS process per worker, speaking the stdio worker protocol
    Process {
        /// Executable to spawn
        program: PathBuf,
        /// Arguments that put the executable into worker mode
        args: Vec<String>,
    },
}

impl Backend {
    /// Process backend that re-launches the current executable as `worker`.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Backend::Process {
            program: std::env::current_exe()?,
            args: vec!["worker".to_string()],
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Threads => "threads",
            Backend::Process { .. } => "process",
        }
    }
}

/// How a finished run maps to success or failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitPolicy {
    /// Promotion mode: always succeeds once the update completes
    pub update: bool,
    /// New and deleted images also count as failures
    pub extended_errors: bool,
    /// Report changes but never fail
    pub ignore_change: bool,
}

/// Worker count for a batch: small batches run on one worker since
/// spawn overhead would dominate.
pub fn effective_concurrency(requested: usize, task_count: usize) -> usize {
    if task_count < SMALL_BATCH_THRESHOLD {
        1
    } else {
        requested.max(1)
    }
}
