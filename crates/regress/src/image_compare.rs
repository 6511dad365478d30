//! Channel-wise image comparison.
//!
//! Two decoded images are reduced to a common 8-bit layout, differenced per
//! channel, and summarized as:
//!
//! - `difference`: mean normalized difference over all channels and pixels, in percent
//! - `max_difference`: largest per-pixel difference, normalized to `[0, 1]`
//! - `different_pixels`: number of pixels with any nonzero channel difference
//!
//! Alongside the statistics the comparator produces a binary equality mask
//! (255 = equal) and an enhanced, inverted difference image (white = equal).

use crate::result::{RegressError, RegressResult};
use image::{ColorType, DynamicImage, GenericImageView, GrayImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for image comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageCompareConfig {
    /// Convert the reference to the test's mode instead of refusing to compare
    pub allow_mode_mismatch: bool,
    /// Multiplier applied to the difference image before inversion
    pub enhance: u8,
}

impl Default for ImageCompareConfig {
    fn default() -> Self {
        Self {
            allow_mode_mismatch: false,
            enhance: 10,
        }
    }
}

impl ImageCompareConfig {
    /// Allow comparing images of different pixel modes
    #[must_use]
    pub const fn with_allow_mode_mismatch(mut self, allow: bool) -> Self {
        self.allow_mode_mismatch = allow;
        self
    }

    /// Set the difference image multiplier
    #[must_use]
    pub const fn with_enhance(mut self, enhance: u8) -> Self {
        self.enhance = enhance;
        self
    }
}

/// 8-bit channel layouts arithmetic is performed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelMode {
    /// Single channel
    L,
    /// Luma + alpha
    La,
    /// Three channels
    Rgb,
    /// Four channels
    Rgba,
}

impl PixelMode {
    /// Working layout for a decoded color type. Wide single-channel data
    /// (the signed/16-bit path) is reduced to `L`.
    #[must_use]
    pub const fn of(color: ColorType) -> Self {
        match color {
            ColorType::L8 | ColorType::L16 => Self::L,
            ColorType::La8 | ColorType::La16 => Self::La,
            ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => Self::Rgb,
            _ => Self::Rgba,
        }
    }

    /// Number of channels
    #[must_use]
    pub const fn channels(self) -> usize {
        match self {
            Self::L => 1,
            Self::La => 2,
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }

    fn raw(self, img: &DynamicImage) -> Vec<u8> {
        match self {
            Self::L => img.to_luma8().into_raw(),
            Self::La => img.to_luma_alpha8().into_raw(),
            Self::Rgb => img.to_rgb8().into_raw(),
            Self::Rgba => img.to_rgba8().into_raw(),
        }
    }
}

/// Display name for a decoded color type, in the familiar `L`/`RGBA` style
#[must_use]
pub fn mode_name(color: ColorType) -> &'static str {
    match color {
        ColorType::L8 => "L",
        ColorType::La8 => "LA",
        ColorType::Rgb8 => "RGB",
        ColorType::Rgba8 => "RGBA",
        ColorType::L16 => "I;16",
        ColorType::La16 => "LA;16",
        ColorType::Rgb16 => "RGB;16",
        ColorType::Rgba16 => "RGBA;16",
        ColorType::Rgb32F => "RGB;F",
        ColorType::Rgba32F => "RGBA;F",
        _ => "unknown",
    }
}

/// Summary statistics of one comparison
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffStats {
    /// Mean normalized difference in percent, `[0, 100]`
    pub difference: f64,
    /// Maximum per-pixel difference, `[0, 1]`
    pub max_difference: f64,
    /// Pixels with any channel difference
    pub different_pixels: u64,
}

impl DiffStats {
    /// No pixel differs
    #[must_use]
    pub fn is_identical(&self) -> bool {
        self.different_pixels == 0
    }
}

/// Statistics plus the derived images
#[derive(Debug, Clone)]
pub struct ImageDiff {
    /// Summary statistics
    pub stats: DiffStats,
    /// Enhanced, inverted per-pixel difference
    pub diff: GrayImage,
    /// 255 where the pixel is equal, 0 otherwise
    pub mask: GrayImage,
}

/// Comparison record for one image present in both the produced and reference sets.
///
/// The statistics are `None` when the images could not be compared
/// (different dimensions, or different modes without `allow_mode_mismatch`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageComparison {
    /// Image file name
    pub image: String,
    /// Produced image dimensions
    pub test_size: (u32, u32),
    /// Produced image mode
    pub test_mode: String,
    /// Reference image dimensions
    pub ref_size: (u32, u32),
    /// Reference image mode
    pub ref_mode: String,
    /// Mean normalized difference in percent
    pub difference: Option<f64>,
    /// Maximum per-pixel difference
    pub max_difference: Option<f64>,
    /// Number of differing pixels
    pub different_pixels: Option<u64>,
}

impl ImageComparison {
    /// Whether statistics exist
    #[must_use]
    pub const fn is_comparable(&self) -> bool {
        self.difference.is_some()
    }

    /// Whether the images are equal
    #[must_use]
    pub fn is_identical(&self) -> bool {
        self.difference == Some(0.0)
    }

    /// Explain why the images could not be compared
    #[must_use]
    pub fn mismatch_note(&self) -> Option<String> {
        if self.is_comparable() {
            return None;
        }
        let mut notes = Vec::new();
        if self.test_size != self.ref_size {
            notes.push(format!(
                "size {}x{} vs. {}x{}",
                self.test_size.0, self.test_size.1, self.ref_size.0, self.ref_size.1
            ));
        }
        if self.test_mode != self.ref_mode {
            notes.push(format!("mode {} vs. {}", self.test_mode, self.ref_mode));
        }
        if notes.is_empty() {
            notes.push("not comparable".to_string());
        }
        Some(notes.join(", "))
    }
}

/// Where to write the derived images of one comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffOutputs {
    /// Enhanced inverted difference image
    pub diff: PathBuf,
    /// Binary equality mask
    pub mask: PathBuf,
    /// Copy of the reference image
    pub reference: PathBuf,
}

impl DiffOutputs {
    /// Standard layout inside a run directory: `imgdiff/`, `imgmask/`, `imgref/`
    #[must_use]
    pub fn in_run_dir(run_dir: &Path, image: &str) -> Self {
        Self {
            diff: run_dir.join("imgdiff").join(image),
            mask: run_dir.join("imgmask").join(image),
            reference: run_dir.join("imgref").join(image),
        }
    }
}

/// Difference two raw buffers of identical layout.
///
/// `test` and `reference` hold `width * height * channels` bytes.
#[must_use]
pub fn diff_buffers(
    test: &[u8],
    reference: &[u8],
    channels: usize,
    width: u32,
    height: u32,
    enhance: u8,
) -> ImageDiff {
    let pixels = (width as usize) * (height as usize);
    let mut diff = GrayImage::new(width, height);
    let mut mask = GrayImage::new(width, height);

    let mut sum: u64 = 0;
    let mut max: u8 = 0;
    let mut equal: u64 = 0;

    for (i, (t, r)) in test
        .chunks_exact(channels)
        .zip(reference.chunks_exact(channels))
        .enumerate()
        .take(pixels)
    {
        let norm: u32 = t
            .iter()
            .zip(r)
            .map(|(a, b)| u32::from(a.abs_diff(*b)))
            .sum();
        let norm = norm.min(255) as u8;

        sum += u64::from(norm);
        max = max.max(norm);
        if norm == 0 {
            equal += 1;
        }

        let x = (i % width as usize) as u32;
        let y = (i / width as usize) as u32;
        mask.put_pixel(x, y, image::Luma([if norm == 0 { 255 } else { 0 }]));
        let enhanced = norm.saturating_mul(enhance);
        diff.put_pixel(x, y, image::Luma([255 - enhanced]));
    }

    let scale = 255.0 * channels as f64;
    let difference = if pixels == 0 {
        0.0
    } else {
        sum as f64 / (scale * pixels as f64) * 100.0
    };

    ImageDiff {
        stats: DiffStats {
            difference,
            max_difference: f64::from(max) / scale,
            different_pixels: pixels as u64 - equal,
        },
        diff,
        mask,
    }
}

/// Image comparator
#[derive(Debug, Clone, Default)]
pub struct ImageComparator {
    config: ImageCompareConfig,
}

impl ImageComparator {
    /// Create a comparator with configuration
    #[must_use]
    pub const fn new(config: ImageCompareConfig) -> Self {
        Self { config }
    }

    /// Get configuration
    #[must_use]
    pub const fn config(&self) -> &ImageCompareConfig {
        &self.config
    }

    /// Compare two decoded images. `None` when they cannot be compared.
    #[must_use]
    pub fn compare(&self, test: &DynamicImage, reference: &DynamicImage) -> Option<ImageDiff> {
        let (width, height) = test.dimensions();
        if reference.dimensions() != (width, height) {
            return None;
        }
        if test.color() != reference.color() && !self.config.allow_mode_mismatch {
            return None;
        }

        // Reference is converted into the test's working layout.
        let mode = PixelMode::of(test.color());
        let test_raw = mode.raw(test);
        let ref_raw = mode.raw(reference);

        Some(diff_buffers(
            &test_raw,
            &ref_raw,
            mode.channels(),
            width,
            height,
            self.config.enhance,
        ))
    }

    /// Compare image files and write the derived images to `outputs`.
    ///
    /// The reference copy is always written; difference and mask only when
    /// the images are comparable.
    ///
    /// # Errors
    ///
    /// Returns an error if either image cannot be decoded or an output cannot be written.
    pub fn compare_files(
        &self,
        name: &str,
        test_path: &Path,
        ref_path: &Path,
        outputs: &DiffOutputs,
    ) -> RegressResult<ImageComparison> {
        let decode = |path: &Path| {
            image::open(path).map_err(|e| RegressError::ImageComparison {
                message: format!("Failed to decode {}: {e}", path.display()),
            })
        };
        let test = decode(test_path)?;
        let reference = decode(ref_path)?;

        for path in [&outputs.diff, &outputs.mask, &outputs.reference] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::copy(ref_path, &outputs.reference)?;

        let result = self.compare(&test, &reference);
        if let Some(diff) = &result {
            diff.diff.save(&outputs.diff)?;
            diff.mask.save(&outputs.mask)?;
        }

        let stats = result.map(|d| d.stats);
        Ok(ImageComparison {
            image: name.to_string(),
            test_size: test.dimensions(),
            test_mode: mode_name(test.color()).to_string(),
            ref_size: reference.dimensions(),
            ref_mode: mode_name(reference.color()).to_string(),
            difference: stats.map(|s| s.difference),
            max_difference: stats.map(|s| s.max_difference),
            different_pixels: stats.map(|s| s.different_pixels),
        })
    }
}
