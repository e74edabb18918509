//! Directory walking implementation using walkdir.

use super::{filter::ImageFilter, ImagePath};
use crate::error::ScanError;
use std::path::Path;
use walkdir::WalkDir;

/// Configuration for the directory scanner
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// Whether to follow symbolic links
    pub follow_symlinks: bool,
    /// Whether to include hidden files and directories
    pub include_hidden: bool,
    /// Maximum directory depth (None = unlimited)
    pub max_depth: Option<usize>,
    /// Custom extensions to include (None = use defaults)
    pub extensions: Option<Vec<String>>,
}

/// Images found under one root
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Root-relative image paths, in walk order
    pub images: Vec<ImagePath>,
    /// Errors that occurred during scanning (non-fatal)
    pub errors: Vec<ScanError>,
}

/// Scanner implementation using the walkdir crate
pub struct WalkDirScanner {
    config: ScanConfig,
    filter: ImageFilter,
}

impl WalkDirScanner {
    /// Create a new scanner with the given configuration
    pub fn new(config: ScanConfig) -> Self {
        let mut filter = ImageFilter::new().with_hidden(config.include_hidden);

        if let Some(ref extensions) = config.extensions {
            filter = filter.with_extensions(extensions.clone());
        }

        Self { config, filter }
    }

    /// Scan one root and return its images relative to that root.
    ///
    /// A missing root is reported as `DirectoryNotFound`; callers decide
    /// whether that is fatal.
    pub fn scan_root(&self, root: &Path) -> Result<ScanResult, ScanError> {
        if !root.is_dir() {
            return Err(ScanError::DirectoryNotFound {
                path: root.to_path_buf(),
            });
        }

        let mut result = ScanResult::default();

        let mut walker = WalkDir::new(root).follow_links(self.config.follow_symlinks);
        if let Some(depth) = self.config.max_depth {
            walker = walker.max_depth(depth);
        }

        let entries = walker
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.filter.is_hidden(entry.path()));

        for entry_result in entries {
            match entry_result {
                Ok(entry) => {
                    if !entry.file_type().is_file() && !entry.path().is_file() {
                        continue;
                    }

                    let path = entry.path();
                    if !self.filter.should_include(path) {
                        continue;
                    }

                    let relative = path.strip_prefix(root).ok().and_then(ImagePath::from_relative);
                    match relative {
                        Some(image) => result.images.push(image),
                        None => tracing::debug!(path = %path.display(), "skipping non-relative entry"),
                    }
                }
                Err(e) => {
                    let path = e.path().map(|p| p.to_path_buf()).unwrap_or_default();

                    let error = if e.io_error().map(|e| e.kind())
                        == Some(std::io::ErrorKind::PermissionDenied)
                    {
                        ScanError::PermissionDenied { path }
                    } else {
                        ScanError::ReadDirectory {
                            path,
                            source: std::io::Error::other(e.to_string()),
                        }
                    };

                    result.errors.push(error);
                }
            }
        }

        Ok(result)
    }
}

impl Default for WalkDirScanner {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, relative: &str) {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, [0x89, 0x50, 0x4E, 0x47]).unwrap();
    }

    fn names(result: &ScanResult) -> Vec<String> {
        let mut names: Vec<String> = result.images.iter().map(|i| i.to_string()).collect();
        names.sort();
        names
    }

    #[test]
    fn scan_empty_directory_returns_empty_vec() {
        let temp_dir = TempDir::new().unwrap();
        let result = WalkDirScanner::default().scan_root(temp_dir.path()).unwrap();

        assert!(result.images.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn scan_returns_root_relative_posix_paths() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "sample.png");
        touch(temp_dir.path(), "nested/deeper/button.jpg");

        let result = WalkDirScanner::default().scan_root(temp_dir.path()).unwrap();

        assert_eq!(names(&result), vec!["nested/deeper/button.jpg", "sample.png"]);
    }

    #[test]
    fn scan_skips_hidden_directories() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "visible.png");
        touch(temp_dir.path(), ".git/objects/blob.png");

        let result = WalkDirScanner::default().scan_root(temp_dir.path()).unwrap();

        assert_eq!(names(&result), vec!["visible.png"]);
    }

    #[test]
    fn scan_excludes_non_image_files() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "sample.png");
        touch(temp_dir.path(), "README.md");

        let result = WalkDirScanner::default().scan_root(temp_dir.path()).unwrap();

        assert_eq!(names(&result), vec!["sample.png"]);
    }

    #[test]
    fn max_depth_limits_the_walk() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "top.png");
        touch(temp_dir.path(), "one/mid.png");
        touch(temp_dir.path(), "one/two/deep.png");

        let scanner = WalkDirScanner::new(ScanConfig {
            max_depth: Some(2),
            ..Default::default()
        });
        let result = scanner.scan_root(temp_dir.path()).unwrap();

        assert_eq!(names(&result), vec!["one/mid.png", "top.png"]);
    }

    #[test]
    fn custom_extensions_narrow_the_walk() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "a.png");
        touch(temp_dir.path(), "b.JPG");
        touch(temp_dir.path(), "c.webp");

        let scanner = WalkDirScanner::new(ScanConfig {
            extensions: Some(vec!["jpg".to_string(), "webp".to_string()]),
            ..Default::default()
        });
        let result = scanner.scan_root(temp_dir.path()).unwrap();

        assert_eq!(names(&result), vec!["b.JPG", "c.webp"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_walked_only_when_followed() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        touch(temp_dir.path(), "own.png");
        touch(outside.path(), "linked.png");
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("shared")).unwrap();

        let plain = WalkDirScanner::default().scan_root(temp_dir.path()).unwrap();
        let following = WalkDirScanner::new(ScanConfig {
            follow_symlinks: true,
            ..Default::default()
        })
        .scan_root(temp_dir.path())
        .unwrap();

        assert_eq!(names(&plain), vec!["own.png"]);
        assert_eq!(names(&following), vec!["own.png", "shared/linked.png"]);
    }

    #[test]
    fn scan_nonexistent_directory_returns_error() {
        let result = WalkDirScanner::default().scan_root(Path::new("/nonexistent/path/12345"));
        assert!(matches!(result, Err(ScanError::DirectoryNotFound { .. })));
    }
}
