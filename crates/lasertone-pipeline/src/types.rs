//! Shared types for the lasertone processing pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage` so downstream crates can reference the
/// source and processed rasters without depending on `image` directly.
///
/// Every stage of the pipeline reads and writes RGBA8. Grayscale data is
/// stored with `R == G == B` and alpha carried through untouched.
pub use image::RgbaImage;

/// Number of bins in a luminance histogram.
pub const HISTOGRAM_BINS: usize = 256;

/// Wrap a raw interleaved RGBA8 buffer in an [`RgbaImage`].
///
/// # Errors
///
/// Returns [`PipelineError::InvalidImageData`] if `pixels.len()` is not
/// a multiple of 4 or does not equal `width * height * 4`. The buffer is
/// never truncated or padded.
pub fn image_from_rgba8(
    width: u32,
    height: u32,
    pixels: Vec<u8>,
) -> Result<RgbaImage, PipelineError> {
    let len = pixels.len();
    let expected = u64::from(width) * u64::from(height) * 4;
    if len % 4 != 0 || u64::try_from(len).ok() != Some(expected) {
        return Err(PipelineError::InvalidImageData { width, height, len });
    }
    RgbaImage::from_raw(width, height, pixels)
        .ok_or(PipelineError::InvalidImageData { width, height, len })
}

// ───────────────────────────── Histogram ─────────────────────────────

/// A 256-bin luminance histogram.
///
/// Invariant: the sum of all bins equals the pixel count of the image it
/// was computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram([u32; HISTOGRAM_BINS]);

impl Histogram {
    /// Wrap raw bin counts.
    #[must_use]
    pub const fn new(bins: [u32; HISTOGRAM_BINS]) -> Self {
        Self(bins)
    }

    /// The raw bin counts.
    #[must_use]
    pub const fn bins(&self) -> &[u32; HISTOGRAM_BINS] {
        &self.0
    }

    /// Total number of counted pixels.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.0.iter().map(|&c| u64::from(c)).sum()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self([0; HISTOGRAM_BINS])
    }
}

impl Serialize for Histogram {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.as_slice().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Histogram {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bins = Vec::<u32>::deserialize(deserializer)?;
        let bins: [u32; HISTOGRAM_BINS] = bins.try_into().map_err(|v: Vec<u32>| {
            serde::de::Error::invalid_length(v.len(), &"exactly 256 histogram bins")
        })?;
        Ok(Self(bins))
    }
}

/// A local maximum of the smoothed, normalized histogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// Gray level of the peak (0..=255).
    pub position: u8,
    /// Smoothed normalized height (fraction of total mass).
    pub height: f64,
}

/// Shape features extracted from a histogram.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramFeatures {
    /// Up to three most prominent peaks, tallest first.
    pub peaks: Vec<Peak>,
    /// Gray level of the deepest point between each pair of
    /// position-adjacent peaks.
    pub valleys: Vec<u8>,
    /// Fraction of pixels in bins `[0,10]` or `[245,255]`.
    pub bw_ratio: f64,
    /// Depth of the valley between the two tallest peaks (0 when absent).
    pub valley_depth: f64,
}

impl HistogramFeatures {
    /// Number of retained peaks.
    #[must_use]
    pub fn peak_count(&self) -> usize {
        self.peaks.len()
    }
}

/// Summary statistics of a grayscale image.
///
/// Derived and immutable. Recompute whenever the underlying grayscale
/// image changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStats {
    /// Mean gray level.
    pub mean: f64,
    /// Population standard deviation of the gray level.
    pub std_dev: f64,
    /// Luminance histogram of the R channel.
    pub histogram: Histogram,
    /// Prominent histogram peaks, tallest first.
    pub peaks: Vec<Peak>,
    /// Valley positions between adjacent peaks.
    pub valleys: Vec<u8>,
}

// ───────────────────────────── Features ──────────────────────────────

/// Texture, edge, and color features used by the classifier.
///
/// Ratios lie in `[0, 1]`. `edge_contrast` is a mean Sobel magnitude and
/// is not normalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSet {
    /// Fraction of pixels with Sobel magnitude above the edge threshold.
    pub edge_ratio: f64,
    /// Fraction of pixels with Sobel magnitude above the distinct-edge threshold.
    pub distinct_edge_ratio: f64,
    /// Fraction of edge pixels that belong to long-edge components.
    pub long_edge_ratio: f64,
    /// Number of long-edge components found.
    pub long_edge_count: u32,
    /// Mean Sobel magnitude over edge pixels.
    pub edge_contrast: f64,
    /// Fraction of pixels lying in flat 3x3 blocks.
    pub low_variance_area_ratio: f64,
    /// `1 - distinct_levels / 32` over a sparse sample.
    pub color_simplicity: f64,
    /// Fraction of sampled pixels matching a skin-tone rule.
    pub skin_tone_ratio: f64,
    /// Number of same-level regions in the block-quantized image.
    pub color_block_count: u32,
    /// Fraction of near-black or near-white pixels.
    pub bw_ratio: f64,
}

/// Heuristic content category of a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    /// Continuous-tone photograph.
    Photo,
    /// Flat-color or line-art imagery.
    Cartoon,
    /// Photograph containing at least one detected face.
    Portrait,
}

impl std::fmt::Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Photo => "photo",
            Self::Cartoon => "cartoon",
            Self::Portrait => "portrait",
        })
    }
}

impl std::str::FromStr for ImageType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "photo" => Ok(Self::Photo),
            "cartoon" => Ok(Self::Cartoon),
            "portrait" => Ok(Self::Portrait),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown image type `{other}`"
            ))),
        }
    }
}

// ───────────────────────────── Parameters ────────────────────────────

/// Which dithering algorithm to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DitherType {
    /// Floyd-Steinberg error diffusion (4 neighbors, /16).
    #[default]
    FloydSteinberg,
    /// Jarvis-Judice-Ninke error diffusion (12 neighbors, /48).
    JarvisJudiceNinke,
    /// Atkinson error diffusion (6 neighbors, 1/8 each).
    Atkinson,
    /// Binary 8x8 Bayer ordered dithering.
    Ordered,
    /// Multi-level 8x8 Bayer dithering (see `bayer_levels`).
    Bayer,
}

/// Tone-mapping and output parameters for one processing call.
///
/// This is also the record consumed from the material preset table.
/// Unknown keys are ignored and missing keys take their defaults, so a
/// partial preset deserializes cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessingParams {
    /// Brightness offset in percent, `[-100, 100]`.
    pub brightness: i32,
    /// Contrast multiplier, `[0.1, 3.0]`.
    pub contrast: f64,
    /// Contrast pivot. Replaced by the computed anchor unless overridden.
    pub anchor_gray: u8,
    /// Levels input black point, `[0, 254]`.
    pub level_in_low: u8,
    /// Levels input white point, `[1, 255]`.
    pub level_in_high: u8,
    /// Levels output black point. Fixed at 0.
    pub level_out_low: u8,
    /// Levels output white point. Fixed at 255.
    pub level_out_high: u8,
    /// Unsharp-mask amount, `[0, 100]`.
    pub sharpness: u8,
    /// Whether to dither the tone-mapped image.
    pub dither_enabled: bool,
    /// Which dithering algorithm to use.
    pub dither_type: DitherType,
    /// Binarization threshold for error diffusion.
    pub dither_threshold: u8,
    /// Quantization levels for [`DitherType::Bayer`], `[2, 6]`.
    pub bayer_levels: u8,
    /// Invert the final image (light marks on dark stock).
    pub invert: bool,
}

impl ProcessingParams {
    /// Brightness range.
    pub const BRIGHTNESS_RANGE: (i32, i32) = (-100, 100);
    /// Contrast range.
    pub const CONTRAST_RANGE: (f64, f64) = (0.1, 3.0);
    /// Maximum sharpness amount.
    pub const MAX_SHARPNESS: u8 = 100;
    /// Bayer level range.
    pub const BAYER_LEVELS_RANGE: (u8, u8) = (2, 6);

    /// Return a copy with every field clamped into its documented range.
    ///
    /// Out-of-range values are clamped rather than rejected. A non-finite
    /// contrast falls back to 1.0. Output levels are forced to 0/255.
    #[must_use]
    pub fn clamped(&self) -> Self {
        let contrast = if self.contrast.is_finite() {
            self.contrast
                .clamp(Self::CONTRAST_RANGE.0, Self::CONTRAST_RANGE.1)
        } else {
            1.0
        };
        Self {
            brightness: self
                .brightness
                .clamp(Self::BRIGHTNESS_RANGE.0, Self::BRIGHTNESS_RANGE.1),
            contrast,
            anchor_gray: self.anchor_gray,
            level_in_low: self.level_in_low.min(254),
            level_in_high: self.level_in_high.max(1),
            level_out_low: 0,
            level_out_high: 255,
            sharpness: self.sharpness.min(Self::MAX_SHARPNESS),
            dither_enabled: self.dither_enabled,
            dither_type: self.dither_type,
            dither_threshold: self.dither_threshold,
            bayer_levels: self
                .bayer_levels
                .clamp(Self::BAYER_LEVELS_RANGE.0, Self::BAYER_LEVELS_RANGE.1),
            invert: self.invert,
        }
    }
}

impl Default for ProcessingParams {
    fn default() -> Self {
        Self {
            brightness: 0,
            contrast: 1.0,
            anchor_gray: 128,
            level_in_low: 0,
            level_in_high: 255,
            level_out_low: 0,
            level_out_high: 255,
            sharpness: 0,
            dither_enabled: false,
            dither_type: DitherType::default(),
            dither_threshold: 128,
            bayer_levels: 4,
            invert: false,
        }
    }
}

/// Kind of laser source the output is tuned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaserType {
    /// Blue/violet diode module.
    #[default]
    Diode,
    /// CO2 tube.
    Co2,
    /// Fiber source.
    Fiber,
}

impl std::fmt::Display for LaserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Diode => "diode",
            Self::Co2 => "co2",
            Self::Fiber => "fiber",
        })
    }
}

/// The material the image will be engraved on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialContext {
    /// Material identifier from the preset table, e.g. `wood` or `metal`.
    pub material_id: String,
    /// Material variant, e.g. `light` or `dark`.
    pub variant: String,
    /// Laser source.
    pub laser_type: LaserType,
}

impl MaterialContext {
    /// Create a new material context.
    #[must_use]
    pub fn new(material_id: impl Into<String>, variant: impl Into<String>, laser_type: LaserType) -> Self {
        Self {
            material_id: material_id.into(),
            variant: variant.into(),
            laser_type,
        }
    }

    /// Whether the material is metal.
    #[must_use]
    pub fn is_metal(&self) -> bool {
        self.material_id.eq_ignore_ascii_case("metal")
    }

    /// Whether the variant is the dark finish.
    #[must_use]
    pub fn is_dark_variant(&self) -> bool {
        self.variant.eq_ignore_ascii_case("dark")
    }
}

/// Caller-supplied shortcuts that bypass parts of the analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Overrides {
    /// Use this contrast pivot instead of computing one.
    pub anchor_gray: Option<u8>,
    /// Skip classification and use this type (e.g. cached from an
    /// earlier call on the same source image).
    pub known_image_type: Option<ImageType>,
    /// Upper bound on the face-detector call. Defaults to
    /// [`DEFAULT_FACE_TIMEOUT`] when `None`.
    pub face_timeout: Option<Duration>,
}

/// Default upper bound on a face-detector call.
pub const DEFAULT_FACE_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything `process_image` needs besides the pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRequest {
    /// Target material and laser.
    pub material: MaterialContext,
    /// Base parameters from the material preset.
    pub params: ProcessingParams,
    /// Analysis shortcuts.
    pub overrides: Overrides,
}

/// Errors that can occur during pipeline processing.
///
/// Uses custom `Serialize`/`Deserialize` so the error can cross a
/// process or worker boundary as JSON.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The pixel buffer does not match the declared dimensions.
    #[error("invalid image data: {len} bytes for {width}x{height} RGBA8")]
    InvalidImageData {
        /// Declared width.
        width: u32,
        /// Declared height.
        height: u32,
        /// Actual buffer length in bytes.
        len: usize,
    },

    /// A configuration record could not be interpreted.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Serde-compatible proxy for `PipelineError`.
#[derive(Serialize, Deserialize)]
enum PipelineErrorProxy {
    InvalidImageData { width: u32, height: u32, len: usize },
    InvalidConfig(String),
}

impl Serialize for PipelineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::InvalidImageData { width, height, len } => PipelineErrorProxy::InvalidImageData {
                width: *width,
                height: *height,
                len: *len,
            },
            Self::InvalidConfig(s) => PipelineErrorProxy::InvalidConfig(s.clone()),
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PipelineError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = PipelineErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            PipelineErrorProxy::InvalidImageData { width, height, len } => {
                Self::InvalidImageData { width, height, len }
            }
            PipelineErrorProxy::InvalidConfig(s) => Self::InvalidConfig(s),
        })
    }
}
