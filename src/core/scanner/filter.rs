//! File filtering logic for the scanner.

use std::collections::HashSet;
use std::path::Path;

/// Extensions a comparable image may carry
pub const IMAGE_EXTENSIONS: [&str; 7] = ["tiff", "jpeg", "jpg", "gif", "png", "bmp", "webp"];

/// Filters files to determine if they are comparable images
pub struct ImageFilter {
    /// File extensions to include (lowercase)
    extensions: HashSet<String>,
    /// Whether to include hidden files
    include_hidden: bool,
}

impl ImageFilter {
    /// Create a new filter with the default raster allow-list
    pub fn new() -> Self {
        Self {
            extensions: IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            include_hidden: false,
        }
    }

    /// Include hidden files (starting with .)
    pub fn with_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// Override the list of extensions to accept
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions.into_iter().map(|e| e.to_lowercase()).collect();
        self
    }

    /// Whether a directory or file name is hidden and should be skipped
    pub fn is_hidden(&self, path: &Path) -> bool {
        !self.include_hidden
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with('.'))
    }

    /// Check if a file should be included
    pub fn should_include(&self, path: &Path) -> bool {
        if self.is_hidden(path) {
            return false;
        }

        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_lowercase()))
    }
}

impl Default for ImageFilter {
    fn default() -> Self {
        Self::new()
    }
}
