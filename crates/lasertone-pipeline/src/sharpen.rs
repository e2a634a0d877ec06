//! 3x3 unsharp-mask sharpening.
//!
//! Convolves each of R, G and B with
//!
//! ```text
//! [ -f   -f   -f ]
//! [ -f  1+8f  -f ]      f = amount / 100
//! [ -f   -f   -f ]
//! ```
//!
//! The kernel sums to 1, so flat regions pass through unchanged. Border
//! pixels (first/last row and column) are copied from the source rather
//! than padded or wrapped, and alpha is never touched.

use image::Rgba;

use crate::tone::clamp_u8;
use crate::types::RgbaImage;

/// Largest meaningful amount; larger values are clamped.
pub const MAX_AMOUNT: f64 = 100.0;

/// Sharpen an RGBA image by `amount` in `[0, 100]`.
///
/// `amount <= 0` (or NaN) returns the input unchanged. Each output row
/// reads only the source, so rows may be computed independently.
#[must_use = "returns the sharpened image"]
pub fn sharpen(image: &RgbaImage, amount: f64) -> RgbaImage {
    if amount.is_nan() || amount <= 0.0 {
        return image.clone();
    }
    let f = amount.min(MAX_AMOUNT) / 100.0;
    let center = 8.0f64.mul_add(f, 1.0);

    let (w, h) = image.dimensions();
    let mut out = image.clone();
    if w < 3 || h < 3 {
        return out;
    }

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let source = image.get_pixel(x, y).0;
            let mut channels = [0u8; 3];
            for (c, slot) in channels.iter_mut().enumerate() {
                let mut ring = 0.0;
                for ny in y - 1..=y + 1 {
                    for nx in x - 1..=x + 1 {
                        if nx != x || ny != y {
                            ring += f64::from(image.get_pixel(nx, ny).0[c]);
                        }
                    }
                }
                *slot = clamp_u8(center.mul_add(f64::from(source[c]), -f * ring));
            }
            out.put_pixel(x, y, Rgba([channels[0], channels[1], channels[2], source[3]]));
        }
    }
    out
}
