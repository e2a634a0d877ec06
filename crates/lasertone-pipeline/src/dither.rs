//! Binarization and multi-level halftoning of grayscale images.
//!
//! Three error-diffusion kernels (Floyd-Steinberg, Jarvis-Judice-Ninke,
//! Atkinson) and two 8x8 Bayer ordered modes. All read the R channel,
//! write `R = G = B`, and carry alpha through. Every function is a pure
//! function of its inputs: the same image and settings always produce
//! byte-identical output.
//!
//! Error diffusion scans rows left to right, top to bottom. Each pixel's
//! quantization error feeds pixels not yet visited, so the scan is
//! inherently sequential. The ordered modes have no such dependency.

use image::Rgba;

use crate::tone::clamp_u8;
use crate::types::{DitherType, RgbaImage};

/// An error diffusion kernel.
///
/// Each `(dx, dy, weight)` entry sends `error * weight / divisor` to the
/// pixel at the given offset. `dy` is never negative, and `dy == 0`
/// entries always have `dx > 0`, so error only reaches unvisited pixels.
#[derive(Debug, Clone, Copy)]
pub struct Kernel {
    /// `(dx, dy, weight)` entries.
    pub entries: &'static [(i32, i32, u8)],
    /// Denominator for the weights.
    pub divisor: u8,
    /// Rows below the current one that the kernel reaches.
    pub max_dy: usize,
    /// Round each share toward negative infinity instead of keeping the
    /// exact fraction.
    pub floor_shares: bool,
}

/// Floyd-Steinberg: 4 neighbors, 16ths.
///
/// ```text
///        X   7
///    3   5   1
/// ```
pub const FLOYD_STEINBERG: Kernel = Kernel {
    entries: &[(1, 0, 7), (-1, 1, 3), (0, 1, 5), (1, 1, 1)],
    divisor: 16,
    max_dy: 1,
    floor_shares: false,
};

/// Jarvis-Judice-Ninke: 12 neighbors over three rows, 48ths.
///
/// ```text
///            X   7   5
///    3   5   7   5   3
///    1   3   5   3   1
/// ```
pub const JARVIS_JUDICE_NINKE: Kernel = Kernel {
    entries: &[
        (1, 0, 7),
        (2, 0, 5),
        (-2, 1, 3),
        (-1, 1, 5),
        (0, 1, 7),
        (1, 1, 5),
        (2, 1, 3),
        (-2, 2, 1),
        (-1, 2, 3),
        (0, 2, 5),
        (1, 2, 3),
        (2, 2, 1),
    ],
    divisor: 48,
    max_dy: 2,
    floor_shares: false,
};

/// Atkinson: `floor(error / 8)` to each of 6 neighbors.
///
/// Only 6/8 of the error propagates, which slightly darkens midtones and
/// keeps highlights clean.
///
/// ```text
///        X   1   1
///    1   1   1
///        1
/// ```
pub const ATKINSON: Kernel = Kernel {
    entries: &[(1, 0, 1), (2, 0, 1), (-1, 1, 1), (0, 1, 1), (1, 1, 1), (0, 2, 1)],
    divisor: 8,
    max_dy: 2,
    floor_shares: true,
};

/// 8x8 Bayer threshold matrix with entries `0..64`.
pub const BAYER_8: [[u8; 8]; 8] = [
    [0, 32, 8, 40, 2, 34, 10, 42],
    [48, 16, 56, 24, 50, 18, 58, 26],
    [12, 44, 4, 36, 14, 46, 6, 38],
    [60, 28, 52, 20, 62, 30, 54, 22],
    [3, 35, 11, 43, 1, 33, 9, 41],
    [51, 19, 59, 27, 49, 17, 57, 25],
    [15, 47, 7, 39, 13, 45, 5, 37],
    [63, 31, 55, 23, 61, 29, 53, 21],
];

/// Sliding window of accumulated error, `max_dy + 1` rows deep.
struct ErrorRows {
    rows: Vec<Vec<f64>>,
    width: usize,
}

impl ErrorRows {
    fn new(width: usize, depth: usize) -> Self {
        Self {
            rows: vec![vec![0.0; width]; depth],
            width,
        }
    }

    fn current(&self, x: usize) -> f64 {
        self.rows[0][x]
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add(&mut self, x: usize, dx: i32, dy: usize, error: f64) {
        let Some(target) = x.checked_add_signed(dx as isize) else {
            return;
        };
        if target < self.width {
            self.rows[dy][target] += error;
        }
    }

    /// Drop the finished row and open an empty one at the bottom.
    fn advance(&mut self) {
        self.rows.rotate_left(1);
        if let Some(last) = self.rows.last_mut() {
            last.fill(0.0);
        }
    }
}

/// Binarize with error diffusion.
///
/// `old = value + accumulated error`, `new = 0` if `old < threshold`
/// else 255, and `old - new` is spread by `kernel`. Error falling outside
/// the image is discarded.
#[must_use = "returns the dithered image"]
pub fn error_diffusion(image: &RgbaImage, kernel: &Kernel, threshold: u8) -> RgbaImage {
    let (w, h) = image.dimensions();
    let mut out = image.clone();
    let mut errors = ErrorRows::new(w as usize, kernel.max_dy + 1);
    let threshold = f64::from(threshold);
    let divisor = f64::from(kernel.divisor);

    for y in 0..h {
        for x in 0..w {
            let pixel = out.get_pixel_mut(x, y);
            let old = f64::from(pixel.0[0]) + errors.current(x as usize);
            let new: u8 = if old < threshold { 0 } else { 255 };
            *pixel = Rgba([new, new, new, pixel.0[3]]);

            let error = old - f64::from(new);
            for &(dx, dy, weight) in kernel.entries {
                let share = error * f64::from(weight) / divisor;
                let share = if kernel.floor_shares { share.floor() } else { share };
                // Rows beyond the image are allocated but never read.
                #[allow(clippy::cast_sign_loss)]
                errors.add(x as usize, dx, dy as usize, share);
            }
        }
        errors.advance();
    }
    out
}

/// Bayer threshold for a pixel, normalized to `[0, 1)`.
fn bayer_fraction(x: u32, y: u32) -> f64 {
    f64::from(BAYER_8[(y % 8) as usize][(x % 8) as usize]) / 64.0
}

/// Binary ordered dithering: white where `value > matrix / 64 * 255`.
///
/// The matrix alone sets the threshold; there is no global threshold.
#[must_use = "returns the dithered image"]
pub fn ordered(image: &RgbaImage) -> RgbaImage {
    let mut out = image.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let limit = bayer_fraction(x, y) * 255.0;
        let new: u8 = if f64::from(pixel.0[0]) > limit { 255 } else { 0 };
        *pixel = Rgba([new, new, new, pixel.0[3]]);
    }
    out
}

/// Multi-level Bayer dithering into `levels` evenly spaced grays.
///
/// `n = value / 255 + (t - 0.5) / levels` with `t` the normalized matrix
/// entry, quantized as `floor(n * levels)` clamped to `[0, levels - 1]`
/// and scaled back to `0..=255`. `levels` below 2 is treated as 2.
#[must_use = "returns the dithered image"]
pub fn bayer(image: &RgbaImage, levels: u8) -> RgbaImage {
    let levels = f64::from(levels.max(2));
    let top = levels - 1.0;
    let mut out = image.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let n = f64::from(pixel.0[0]) / 255.0 + (bayer_fraction(x, y) - 0.5) / levels;
        let q = (n * levels).floor().clamp(0.0, top);
        let new = clamp_u8(q * 255.0 / top);
        *pixel = Rgba([new, new, new, pixel.0[3]]);
    }
    out
}

/// Dither with the chosen algorithm.
///
/// `threshold` applies to the error-diffusion kernels and `bayer_levels`
/// to [`DitherType::Bayer`]; each is ignored by the other modes.
#[must_use = "returns the dithered image"]
pub fn dither(image: &RgbaImage, dither_type: DitherType, threshold: u8, bayer_levels: u8) -> RgbaImage {
    match dither_type {
        DitherType::FloydSteinberg => error_diffusion(image, &FLOYD_STEINBERG, threshold),
        DitherType::JarvisJudiceNinke => error_diffusion(image, &JARVIS_JUDICE_NINKE, threshold),
        DitherType::Atkinson => error_diffusion(image, &ATKINSON, threshold),
        DitherType::Ordered => ordered(image),
        DitherType::Bayer => bayer(image, bayer_levels),
    }
}
