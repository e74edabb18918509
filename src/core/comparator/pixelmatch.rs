//! Default comparator: an adapter over `image-diff-rs`.
//!
//! The crate owns the pixel algorithm (YIQ distance, anti-aliasing
//! detection, diff painting). This adapter decodes both inputs with the
//! `image` crate, hands the shared region to the crate, and places the
//! result on the union canvas. Pixels covered by only one of the two
//! images always count as different.

use super::traits::{CompareOptions, PixelComparator, PixelDiff};
use crate::error::DiffError;
use image::{imageops, ImageFormat, Rgba, RgbaImage};
use image_diff_rs::DiffOption;
use std::io::Cursor;
use std::path::Path;

/// Paint for pixels outside the shared region
const UNCOVERED_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Comparator backed by `image-diff-rs`
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelMatchComparator;

impl PixelMatchComparator {
    pub fn new() -> Self {
        Self
    }

    fn load(path: &Path) -> Result<RgbaImage, DiffError> {
        let image = image::open(path).map_err(|e| DiffError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(image.to_rgba8())
    }
}

impl PixelComparator for PixelMatchComparator {
    fn compare(
        &self,
        actual: &Path,
        expected: &Path,
        diff: &Path,
        options: &CompareOptions,
    ) -> Result<PixelDiff, DiffError> {
        let actual_image = Self::load(actual)?;
        let expected_image = Self::load(expected)?;

        let shared_width = actual_image.width().min(expected_image.width());
        let shared_height = actual_image.height().min(expected_image.height());
        let width = actual_image.width().max(expected_image.width());
        let height = actual_image.height().max(expected_image.height());

        let mut canvas = RgbaImage::from_pixel(width, height, UNCOVERED_COLOR);
        let mut diff_count = u64::from(width) * u64::from(height)
            - u64::from(shared_width) * u64::from(shared_height);

        if shared_width > 0 && shared_height > 0 {
            let shared = |image: &RgbaImage| {
                imageops::crop_imm(image, 0, 0, shared_width, shared_height).to_image()
            };
            let (region, count) =
                diff_region(&shared(&actual_image), &shared(&expected_image), options)?;
            imageops::replace(&mut canvas, &region, 0, 0);
            diff_count += count;
        }

        canvas.save(diff).map_err(|e| DiffError::WriteArtifact {
            path: diff.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(PixelDiff {
            width,
            height,
            diff_count,
        })
    }

    fn name(&self) -> &'static str {
        "pixelmatch"
    }
}

/// Run the crate on two same-sized images
fn diff_region(
    actual: &RgbaImage,
    expected: &RgbaImage,
    options: &CompareOptions,
) -> Result<(RgbaImage, u64), DiffError> {
    let failed = |reason: String| DiffError::Compare { reason };

    let output = image_diff_rs::diff(
        encode_png(actual).map_err(failed)?,
        encode_png(expected).map_err(failed)?,
        &DiffOption {
            threshold: Some(options.threshold.clamp(0.0, 1.0)),
            include_anti_alias: Some(options.include_anti_alias),
        },
    )
    .map_err(|e| failed(e.to_string()))?;

    let count = u64::try_from(output.diff_count)
        .map_err(|_| failed(format!("diff count out of range: {}", output.diff_count)))?;
    let painted = image::load_from_memory(&output.diff_image)
        .map_err(|e| failed(format!("unreadable diff image: {e}")))?
        .to_rgba8();

    Ok((painted, count))
}

fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, String> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .map_err(|e| e.to_string())?;
    Ok(bytes.into_inner())
}
