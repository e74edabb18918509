//! Pixel comparison seam.

use crate::error::DiffError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options forwarded to the pixel comparator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompareOptions {
    /// Per-pixel color distance (0.0 - 1.0)
    pub threshold: f32,
    /// Count anti-aliased edge pixels as differences
    pub include_anti_alias: bool,
}

/// Result of a pixel comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelDiff {
    pub width: u32,
    pub height: u32,
    pub diff_count: u64,
}

/// Compares two image files and writes a diff image.
///
/// The engine never decodes rasters itself; everything below this trait is
/// a collaborator that can be swapped (e.g. for a GPU or external tool).
pub trait PixelComparator: Send + Sync {
    /// Compare `actual` against `expected` and write the visualization to `diff`.
    fn compare(
        &self,
        actual: &Path,
        expected: &Path,
        diff: &Path,
        options: &CompareOptions,
    ) -> Result<PixelDiff, DiffError>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}
