//! # Comparator Module
//!
//! The pixel-comparison collaborator.
//!
//! The engine only talks to [`PixelComparator`]. [`PixelMatchComparator`] is
//! the default implementation, an adapter that delegates the pixel work to
//! the `image-diff-rs` crate.

mod pixelmatch;
mod traits;

pub use pixelmatch::PixelMatchComparator;
pub use traits::{CompareOptions, PixelComparator, PixelDiff};

use std::sync::Arc;

/// The comparator used when none is configured
pub fn default_comparator() -> Arc<dyn PixelComparator> {
    Arc::new(PixelMatchComparator::new())
}
