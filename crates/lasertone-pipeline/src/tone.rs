//! Tone operations on grayscale images: brightness/contrast around an
//! anchor, levels remapping, and inversion.
//!
//! Every operation here is a pure per-value mapping. It is compiled into
//! a 256-entry lookup table and applied to the R, G and B channels of each
//! pixel; alpha is never touched. Rows carry no dependency on each other,
//! so callers may split the work by row ranges without changing results.

use image::Rgba;

use crate::histogram;
use crate::types::{Histogram, ImageType, RgbaImage};

/// Brightness is given in percent; one percent moves gray by 2.55 levels.
pub const BRIGHTNESS_STEP: f64 = 2.55;

/// Fraction of the darkest pixels sampled for the adaptive black point.
pub const ADAPTIVE_BLACK_FRACTION: f64 = 0.005;

/// Minimum average gray of the darkest pixels before the adaptive black
/// point takes effect.
pub const ADAPTIVE_BLACK_MIN: f64 = 30.0;

/// Apply `lut` to the R, G and B channels of every pixel.
#[must_use]
pub(crate) fn map_rgb(image: &RgbaImage, lut: &[u8; 256]) -> RgbaImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let Rgba([r, g, b, a]) = *pixel;
        *pixel = Rgba([
            lut[usize::from(r)],
            lut[usize::from(g)],
            lut[usize::from(b)],
            a,
        ]);
    }
    out
}

/// Build a lookup table from a per-value mapping.
fn build_lut(f: impl Fn(u8) -> u8) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (value, slot) in (0..=u8::MAX).zip(lut.iter_mut()) {
        *slot = f(value);
    }
    lut
}

/// Round and clamp a float into `0..=255`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn clamp_u8(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

/// Brightness and contrast, pivoting around `anchor_gray`.
///
/// `gray' = clamp(round((gray + brightness * 2.55 - anchor) * contrast + anchor))`.
///
/// Contrast scales the deviation from the anchor rather than from 128, so
/// a low anchor pushes midtones toward white and keeps shadow detail.
/// With `brightness = 0` and `contrast = 1.0` this is the identity for
/// any anchor.
#[must_use = "returns the adjusted image"]
pub fn apply_brightness_contrast(
    image: &RgbaImage,
    brightness: i32,
    contrast: f64,
    anchor_gray: u8,
) -> RgbaImage {
    let offset = f64::from(brightness) * BRIGHTNESS_STEP;
    let anchor = f64::from(anchor_gray);
    let lut = build_lut(|v| clamp_u8((f64::from(v) + offset - anchor).mul_add(contrast, anchor)));
    map_rgb(image, &lut)
}

/// Compute the adaptive black point of a histogram.
///
/// Walks the histogram upward from 0, taking the darkest 0.5% of pixels
/// (at least one). Returns their rounded average when it is at least
/// [`ADAPTIVE_BLACK_MIN`], otherwise `None`.
#[must_use]
pub fn adaptive_black_point(histogram: &Histogram) -> Option<u8> {
    let total = histogram.total();
    if total == 0 {
        return None;
    }
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let target = ((total as f64 * ADAPTIVE_BLACK_FRACTION).ceil() as u64).max(1);

    let mut taken: u64 = 0;
    let mut weighted: u64 = 0;
    for (level, &count) in (0u64..).zip(histogram.bins().iter()) {
        if taken >= target {
            break;
        }
        let take = u64::from(count).min(target - taken);
        taken += take;
        weighted += take * level;
    }

    #[allow(clippy::cast_precision_loss)]
    let average = weighted as f64 / taken as f64;
    (average >= ADAPTIVE_BLACK_MIN).then(|| clamp_u8(average))
}

/// Levels remapping with clamping outside the input range.
///
/// Values at or below `in_low` map to `out_low`, values at or above
/// `in_high` map to `out_high`, and values in between are linearly
/// interpolated.
///
/// For [`ImageType::Cartoon`], `in_low` is raised to the
/// [adaptive black point](adaptive_black_point) when that is higher, so
/// dark-gray ink lines are not crushed to solid black. Other image types
/// use `in_low` unchanged.
///
/// Returns the input unchanged when `in_high <= in_low` or
/// `out_high < out_low`. This is a documented no-op rather than an error;
/// callers relying on fail-fast behavior should validate the range
/// themselves.
#[must_use = "returns the remapped image"]
pub fn apply_levels(
    image: &RgbaImage,
    in_low: u8,
    in_high: u8,
    out_low: u8,
    out_high: u8,
    image_type: ImageType,
) -> RgbaImage {
    if in_high <= in_low || out_high < out_low {
        tracing::debug!(in_low, in_high, out_low, out_high, "levels range invalid, skipping");
        return image.clone();
    }

    let mut effective_low = in_low;
    if image_type == ImageType::Cartoon
        && let Some(black) = adaptive_black_point(&histogram::histogram(image))
        && black > in_low
    {
        if black < in_high {
            tracing::debug!(black_point = black, supplied = in_low, "adaptive black point");
            effective_low = black;
        } else {
            tracing::debug!(
                black_point = black,
                in_high,
                "adaptive black point above white point, ignoring"
            );
        }
    }

    let lut = levels_lut(effective_low, in_high, out_low, out_high);
    map_rgb(image, &lut)
}

/// Lookup table for a valid levels mapping.
fn levels_lut(in_low: u8, in_high: u8, out_low: u8, out_high: u8) -> [u8; 256] {
    let in_range = f64::from(in_high) - f64::from(in_low);
    let out_range = f64::from(out_high) - f64::from(out_low);
    build_lut(|v| {
        if v <= in_low {
            out_low
        } else if v >= in_high {
            out_high
        } else {
            let t = (f64::from(v) - f64::from(in_low)) / in_range;
            clamp_u8(t.mul_add(out_range, f64::from(out_low)))
        }
    })
}

/// Invert gray values (`255 - v`). Alpha is unchanged.
///
/// Self-inverse: `invert(&invert(&img)) == img`.
#[must_use = "returns the inverted image"]
pub fn invert(image: &RgbaImage) -> RgbaImage {
    let lut = build_lut(|v| u8::MAX - v);
    map_rgb(image, &lut)
}
