//! # Scanner Module
//!
//! Discovers the comparable image sets of a run.
//!
//! Each root is scanned exactly once, synchronously, before any diffing
//! starts. A missing root is not an error: it yields an empty set and the
//! engine creates the directory afterwards.
//!
//! ## Supported Formats
//! TIFF, JPEG, GIF, PNG, BMP and WebP (case-insensitive extensions).
//!
//! ## Example
//! ```rust,ignore
//! use visual_diff_engine::core::scanner::ImageSetResolver;
//!
//! let set = ImageSetResolver::default().resolve(expected_dir, actual_dir);
//! for image in set.new_images() {
//!     println!("new: {image}");
//! }
//! ```

mod filter;
mod walker;

pub use filter::{ImageFilter, IMAGE_EXTENSIONS};
pub use walker::{ScanConfig, ScanResult, WalkDirScanner};

use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// A root-relative, `/`-separated image path with no leading separator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ImagePath(String);

impl ImagePath {
    /// Normalize a POSIX-style relative path.
    pub fn new(path: impl Into<String>) -> Self {
        let path: String = path.into();
        Self(path.trim_start_matches('/').to_string())
    }

    /// Build from a path relative to a scan root.
    ///
    /// Returns `None` if the path escapes the root or is absolute.
    pub fn from_relative(path: &Path) -> Option<Self> {
        let mut segments = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(segment) => segments.push(segment.to_str()?.to_string()),
                Component::CurDir => {}
                _ => return None,
            }
        }

        if segments.is_empty() {
            return None;
        }
        Some(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve this image under a root directory.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        self.0
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(root.to_path_buf(), |acc, segment| acc.join(segment))
    }

    /// Same path with the file extension replaced (or appended).
    pub fn with_extension(&self, extension: &str) -> Self {
        let name_start = self.0.rfind('/').map_or(0, |slash| slash + 1);
        let stem_end = match self.0[name_start..].rfind('.') {
            Some(0) | None => self.0.len(),
            Some(dot) => name_start + dot,
        };
        Self(format!("{}.{}", &self.0[..stem_end], extension))
    }
}

impl fmt::Display for ImagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ImagePath {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl From<&str> for ImagePath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<ImagePath> for String {
    fn from(path: ImagePath) -> Self {
        path.0
    }
}

/// Paired expected/actual image collections for one run, in scan order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSet {
    pub expected: Vec<ImagePath>,
    pub actual: Vec<ImagePath>,
}

impl ImageSet {
    pub fn new(expected: Vec<ImagePath>, actual: Vec<ImagePath>) -> Self {
        Self { expected, actual }
    }

    /// `expected − actual`
    pub fn deleted_images(&self) -> Vec<ImagePath> {
        difference(&self.expected, &self.actual)
    }

    /// `actual − expected`
    pub fn new_images(&self) -> Vec<ImagePath> {
        difference(&self.actual, &self.expected)
    }

    /// `expected ∩ actual`, in actual scan order. Only these are diffed.
    pub fn common_images(&self) -> Vec<ImagePath> {
        let expected: HashSet<&ImagePath> = self.expected.iter().collect();
        self.actual
            .iter()
            .filter(|image| expected.contains(image))
            .cloned()
            .collect()
    }
}

fn difference(left: &[ImagePath], right: &[ImagePath]) -> Vec<ImagePath> {
    let right: HashSet<&ImagePath> = right.iter().collect();
    left.iter()
        .filter(|image| !right.contains(image))
        .cloned()
        .collect()
}

/// Computes the `ImageSet` of a run from its two roots.
#[derive(Default)]
pub struct ImageSetResolver {
    scanner: WalkDirScanner,
}

impl ImageSetResolver {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            scanner: WalkDirScanner::new(config),
        }
    }

    /// Scan both roots (concurrently, once each) and pair the results.
    pub fn resolve(&self, expected_dir: &Path, actual_dir: &Path) -> ImageSet {
        let (expected, actual) = rayon::join(
            || self.scan_or_empty(expected_dir),
            || self.scan_or_empty(actual_dir),
        );

        debug!(
            expected = expected.len(),
            actual = actual.len(),
            "resolved image sets"
        );
        ImageSet::new(expected, actual)
    }

    fn scan_or_empty(&self, root: &Path) -> Vec<ImagePath> {
        match self.scanner.scan_root(root) {
            Ok(result) => {
                for error in &result.errors {
                    warn!(root = %root.display(), %error, "skipping unreadable entry");
                }
                result.images
            }
            Err(ScanError::DirectoryNotFound { path }) => {
                debug!(root = %path.display(), "root does not exist, treating as empty");
                Vec::new()
            }
            Err(error) => {
                warn!(root = %root.display(), %error, "scan failed, treating as empty");
                Vec::new()
            }
        }
    }
}
