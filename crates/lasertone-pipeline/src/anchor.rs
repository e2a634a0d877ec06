//! Contrast pivot ("anchor gray") selection.
//!
//! The anchor is the gray level that contrast scaling leaves fixed. It is
//! derived from the median and mean of the grayscale histogram with a
//! per-[`ImageType`] formula, then nudged for the target material.

use serde::{Deserialize, Serialize};

use crate::histogram;
use crate::tone::clamp_u8;
use crate::types::{ImageStats, ImageType, MaterialContext};

/// Metal reflects more of the beam's heat; raise the anchor by 10%.
pub const METAL_FACTOR: f64 = 1.1;

/// Dark finishes show less contrast; raise the anchor by 5%.
pub const DARK_VARIANT_FACTOR: f64 = 1.05;

/// Cartoon peaks further apart than this anchor between them.
pub const CARTOON_PEAK_SEPARATION: u8 = 50;

/// Where an anchor value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnchorSource {
    /// Computed from image statistics and material.
    Computed,
    /// Supplied by the caller.
    Override,
}

/// A resolved anchor gray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorGray {
    /// The pivot value.
    pub value: u8,
    /// How it was obtained.
    pub source: AnchorSource,
}

/// `0.5 * median + 0.5 * mean` of the histogram.
#[must_use]
pub fn weighted_gray(stats: &ImageStats) -> f64 {
    0.5f64.mul_add(f64::from(histogram::median(&stats.histogram)), 0.5 * stats.mean)
}

/// `max(round(weighted * factor), floor)`.
fn scaled(weighted: f64, factor: f64, floor: u8) -> u8 {
    clamp_u8(weighted * factor).max(floor)
}

/// Anchor for an image type before any material adjustment.
#[must_use]
pub fn base_anchor(image_type: ImageType, stats: &ImageStats) -> u8 {
    let weighted = weighted_gray(stats);
    match image_type {
        ImageType::Portrait => scaled(weighted, 0.6, 65),
        ImageType::Cartoon => {
            let base = match stats.peaks.as_slice() {
                [p0, p1, ..] if p0.position.abs_diff(p1.position) > CARTOON_PEAK_SEPARATION => {
                    let mid = (f64::from(p0.position) + f64::from(p1.position)) / 2.0;
                    clamp_u8(mid).min(100)
                }
                _ => scaled(weighted, 0.62, 65),
            };
            // Pulled hard toward black so thin lines keep their density.
            clamp_u8(f64::from(base) * 0.35)
        }
        ImageType::Photo => {
            if stats.std_dev < 40.0 {
                scaled(weighted, 0.66, 72)
            } else if stats.std_dev > 60.0 {
                scaled(weighted, 0.69, 75)
            } else {
                scaled(weighted, 0.72, 77)
            }
        }
    }
}

/// Apply the material nudges to a base anchor.
#[must_use]
pub fn adjust_for_material(base: u8, material: &MaterialContext) -> u8 {
    let mut value = f64::from(base);
    if material.is_metal() {
        value *= METAL_FACTOR;
    }
    if material.is_dark_variant() {
        value *= DARK_VARIANT_FACTOR;
    }
    clamp_u8(value)
}

/// Resolve the anchor for one processing call.
///
/// An override is used verbatim: no formula and no material adjustment.
#[must_use]
pub fn resolve_anchor_gray(
    image_type: ImageType,
    stats: &ImageStats,
    material: &MaterialContext,
    override_value: Option<u8>,
) -> AnchorGray {
    if let Some(value) = override_value {
        return AnchorGray {
            value,
            source: AnchorSource::Override,
        };
    }
    let base = base_anchor(image_type, stats);
    let value = adjust_for_material(base, material);
    tracing::debug!(%image_type, base, anchor_gray = value, "computed anchor gray");
    AnchorGray {
        value,
        source: AnchorSource::Computed,
    }
}
