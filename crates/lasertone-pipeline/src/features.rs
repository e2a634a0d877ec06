//! Feature extraction for image classification.
//!
//! Combines the Sobel edge statistics from [`crate::edge`] with texture
//! and color measurements: block-quantized color regions, gray-level
//! diversity, flat-area coverage, and a heuristic skin-tone ratio.
//!
//! The skin-tone rules read the original color pixels; everything else
//! reads the gray channel.

use image::Rgba;

use crate::edge;
use crate::region::{FLOOD_FILL_CAP, FOUR_CONNECTED, Grid};
use crate::types::{FeatureSet, HistogramFeatures, RgbaImage};

/// Side of the square blocks averaged for color-region counting.
pub const COLOR_BLOCK_SIZE: u32 = 4;

/// Gray levels used when quantizing block averages.
pub const COLOR_BLOCK_LEVELS: u32 = 8;

/// Minimum cells for a same-level region to count as a color block.
pub const MIN_COLOR_BLOCK_CELLS: usize = 4;

/// Every Nth pixel is sampled for simplicity and skin tone.
pub const SAMPLE_STRIDE: usize = 4;

/// Width of a gray bucket when measuring gray-level diversity.
pub const SIMPLICITY_BUCKET: u8 = 8;

/// Number of gray buckets (`256 / SIMPLICITY_BUCKET`).
pub const SIMPLICITY_BUCKETS: usize = 32;

/// Side of the square blocks tested for flatness.
pub const VARIANCE_BLOCK_SIZE: u32 = 3;

/// Blocks with a gray variance below this are flat.
pub const LOW_VARIANCE_THRESHOLD: f64 = 30.0;

/// Extract the full feature set.
///
/// `original` supplies color for the skin-tone test; `gray` is the
/// grayscale conversion of the same image.
#[must_use]
pub fn extract_features(
    original: &RgbaImage,
    gray: &RgbaImage,
    histogram: &HistogramFeatures,
) -> FeatureSet {
    let map = edge::sobel(gray);
    let stats = edge::edge_stats(&map);
    let long = edge::long_edges(&map);

    #[allow(clippy::cast_precision_loss)]
    let long_edge_ratio = if stats.edge_count == 0 {
        0.0
    } else {
        long.pixels as f64 / stats.edge_count as f64
    };

    FeatureSet {
        edge_ratio: stats.edge_ratio,
        distinct_edge_ratio: stats.distinct_edge_ratio,
        long_edge_ratio,
        long_edge_count: long.count,
        edge_contrast: stats.edge_contrast,
        low_variance_area_ratio: low_variance_area_ratio(gray),
        color_simplicity: color_simplicity(gray),
        skin_tone_ratio: skin_tone_ratio(original),
        color_block_count: color_block_count(gray),
        bw_ratio: histogram.bw_ratio,
    }
}

/// Count distinct same-level regions in a block-averaged, quantized image.
///
/// The image is averaged over 4x4 blocks (partial blocks at the right and
/// bottom edges average the pixels they have), quantized to 8 levels,
/// and 4-connected same-level regions of at least four blocks are counted.
#[must_use]
pub fn color_block_count(gray: &RgbaImage) -> u32 {
    let (width, height) = gray.dimensions();
    let cols = width.div_ceil(COLOR_BLOCK_SIZE);
    let rows = height.div_ceil(COLOR_BLOCK_SIZE);

    let mut levels = Vec::with_capacity((cols * rows) as usize);
    for by in 0..rows {
        for bx in 0..cols {
            let x0 = bx * COLOR_BLOCK_SIZE;
            let y0 = by * COLOR_BLOCK_SIZE;
            let x1 = (x0 + COLOR_BLOCK_SIZE).min(width);
            let y1 = (y0 + COLOR_BLOCK_SIZE).min(height);
            let mut sum = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += u32::from(gray.get_pixel(x, y).0[0]);
                }
            }
            let count = (x1 - x0) * (y1 - y0);
            let average = sum / count;
            levels.push(average * COLOR_BLOCK_LEVELS / 256);
        }
    }

    let mut grid = Grid::new(cols as usize, rows as usize);
    let mut blocks = 0;
    for start in 0..levels.len() {
        if grid.is_visited(start) {
            continue;
        }
        let level = levels[start];
        let region = grid.fill(start, &FOUR_CONNECTED, FLOOD_FILL_CAP, |i| {
            levels[i] == level
        });
        if region.size >= MIN_COLOR_BLOCK_CELLS {
            blocks += 1;
        }
    }
    blocks
}

/// `1 - distinct_buckets / 32` over every 4th pixel, with gray bucketed
/// in steps of 8. An empty image is maximally simple (1.0).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn color_simplicity(gray: &RgbaImage) -> f64 {
    let mut seen = [false; SIMPLICITY_BUCKETS];
    for pixel in gray.pixels().step_by(SAMPLE_STRIDE) {
        seen[usize::from(pixel.0[0] / SIMPLICITY_BUCKET)] = true;
    }
    let distinct = seen.iter().filter(|&&s| s).count();
    1.0 - distinct as f64 / SIMPLICITY_BUCKETS as f64
}

/// Fraction of all pixels lying in non-overlapping 3x3 blocks whose gray
/// variance is below [`LOW_VARIANCE_THRESHOLD`].
///
/// Partial blocks at the right and bottom edges are never counted as flat.
#[must_use]
pub fn low_variance_area_ratio(gray: &RgbaImage) -> f64 {
    let (width, height) = gray.dimensions();
    let total = u64::from(width) * u64::from(height);
    if total == 0 {
        return 0.0;
    }
    let side = VARIANCE_BLOCK_SIZE;
    let cells = f64::from(side * side);
    let mut flat_pixels: u64 = 0;

    for by in 0..height / side {
        for bx in 0..width / side {
            let mut values = [0.0f64; (VARIANCE_BLOCK_SIZE * VARIANCE_BLOCK_SIZE) as usize];
            for (i, slot) in values.iter_mut().enumerate() {
                // i < 9, so the cast is lossless.
                #[allow(clippy::cast_possible_truncation)]
                let i = i as u32;
                let x = bx * side + i % side;
                let y = by * side + i / side;
                *slot = f64::from(gray.get_pixel(x, y).0[0]);
            }
            let mean = values.iter().sum::<f64>() / cells;
            let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / cells;
            if variance < LOW_VARIANCE_THRESHOLD {
                flat_pixels += u64::from(side * side);
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let ratio = flat_pixels as f64 / total as f64;
    ratio
}

/// Which heuristic skin rule matched a pixel.
///
/// The thresholds are hand-tuned channel differences, not derived from a
/// color model. The rules are disjoint: a pixel matches at most one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkinRule {
    /// Typical skin under daylight: red clearly above green.
    Standard,
    /// Fair skin under strong or flash lighting: yellowish, blue lowest.
    Bright,
    /// Pale pink skin: red barely above green, blue at least green.
    Pink,
}

/// Tunable thresholds for [`SkinRule::Standard`].
pub mod standard_skin {
    /// Minimum red.
    pub const MIN_R: u8 = 95;
    /// Minimum green.
    pub const MIN_G: u8 = 40;
    /// Minimum blue.
    pub const MIN_B: u8 = 20;
    /// Minimum spread between the largest and smallest channel.
    pub const MIN_SPREAD: u8 = 15;
    /// Red must exceed green by more than this.
    pub const MIN_RG_DIFF: u8 = 15;
}

/// Tunable thresholds for [`SkinRule::Bright`].
pub mod bright_skin {
    /// Minimum red.
    pub const MIN_R: u8 = 220;
    /// Minimum green.
    pub const MIN_G: u8 = 210;
    /// Minimum blue.
    pub const MIN_B: u8 = 170;
    /// Maximum red-green difference.
    pub const MAX_RG_DIFF: u8 = 15;
}

/// Tunable thresholds for [`SkinRule::Pink`].
pub mod pink_skin {
    /// Minimum red.
    pub const MIN_R: u8 = 190;
    /// Minimum green.
    pub const MIN_G: u8 = 150;
    /// Minimum blue.
    pub const MIN_B: u8 = 150;
    /// Maximum amount red may exceed green.
    pub const MAX_RG_DIFF: u8 = 15;
    /// Minimum amount red must exceed blue.
    pub const MIN_RB_DIFF: u8 = 5;
}

impl SkinRule {
    /// All rules, in evaluation order.
    pub const ALL: [Self; 3] = [Self::Standard, Self::Bright, Self::Pink];

    /// Whether a color pixel satisfies this rule.
    #[must_use]
    pub fn matches(self, r: u8, g: u8, b: u8) -> bool {
        match self {
            Self::Standard => {
                let spread = r.max(g).max(b) - r.min(g).min(b);
                r > standard_skin::MIN_R
                    && g > standard_skin::MIN_G
                    && b > standard_skin::MIN_B
                    && spread > standard_skin::MIN_SPREAD
                    && r > b
                    && r > g
                    && r - g > standard_skin::MIN_RG_DIFF
            }
            Self::Bright => {
                r > bright_skin::MIN_R
                    && g > bright_skin::MIN_G
                    && b > bright_skin::MIN_B
                    && r.abs_diff(g) <= bright_skin::MAX_RG_DIFF
                    && r > b
                    && g > b
            }
            Self::Pink => {
                r > pink_skin::MIN_R
                    && g > pink_skin::MIN_G
                    && b > pink_skin::MIN_B
                    && r > g
                    && r - g <= pink_skin::MAX_RG_DIFF
                    && b >= g
                    && r > b
                    && r - b >= pink_skin::MIN_RB_DIFF
            }
        }
    }
}

/// Classify one color pixel against the skin rules.
#[must_use]
pub fn skin_rule(r: u8, g: u8, b: u8) -> Option<SkinRule> {
    SkinRule::ALL.into_iter().find(|rule| rule.matches(r, g, b))
}

/// Fraction of every 4th pixel that matches any skin rule.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn skin_tone_ratio(original: &RgbaImage) -> f64 {
    let mut sampled = 0usize;
    let mut skin = 0usize;
    for &Rgba([r, g, b, _]) in original.pixels().step_by(SAMPLE_STRIDE) {
        sampled += 1;
        if skin_rule(r, g, b).is_some() {
            skin += 1;
        }
    }
    if sampled == 0 {
        0.0
    } else {
        skin as f64 / sampled as f64
    }
}
