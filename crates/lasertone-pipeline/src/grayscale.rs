//! Grayscale conversion.
//!
//! The first step in the pipeline: RGBA in, RGBA out with
//! `R == G == B` set to the luminance of the source pixel and alpha left
//! untouched. Every later stage reads the R channel as the gray value.

use image::Rgba;

use crate::types::RgbaImage;

/// Luminance weights for R, G and B (ITU-R BT.601).
pub const LUMA_WEIGHTS: [f64; 3] = [0.299, 0.587, 0.114];

/// Luminance of one RGB triple, rounded to the nearest integer.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    let y = LUMA_WEIGHTS[2].mul_add(
        f64::from(b),
        LUMA_WEIGHTS[0].mul_add(f64::from(r), LUMA_WEIGHTS[1] * f64::from(g)),
    );
    // Weights sum to 1.0, so `y` never leaves 0..=255.
    y.round().clamp(0.0, 255.0) as u8
}

/// Convert an RGBA image to grayscale.
///
/// Per pixel, `gray = round(0.299 R + 0.587 G + 0.114 B)` is written to
/// R, G and B. Alpha is preserved. Deterministic, no side effects.
#[must_use = "returns the grayscale image"]
pub fn to_grayscale(image: &RgbaImage) -> RgbaImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let Rgba([r, g, b, a]) = *pixel;
        let y = luminance(r, g, b);
        *pixel = Rgba([y, y, y, a]);
    }
    out
}

/// Extract the gray channel (R) of an RGBA image as a single-channel image.
///
/// Used where single-channel `imageproc` operations need a `GrayImage`.
#[must_use]
pub fn gray_channel(image: &RgbaImage) -> image::GrayImage {
    image::GrayImage::from_fn(image.width(), image.height(), |x, y| {
        image::Luma([image.get_pixel(x, y).0[0]])
    })
}
