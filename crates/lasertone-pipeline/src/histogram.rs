//! Histogram analysis: bin counts, mean and standard deviation, and the
//! shape features (peaks, valleys, black/white dominance) the classifier
//! and anchor calculator depend on.
//!
//! All functions read the R channel and assume `R == G == B`.

use crate::types::{
    HISTOGRAM_BINS, Histogram, HistogramFeatures, ImageStats, Peak, RgbaImage,
};

/// Width of the moving-average window applied before peak search.
pub const SMOOTHING_WINDOW: usize = 5;

/// Minimum smoothed peak height as a fraction of the total mass.
pub const MIN_PEAK_HEIGHT: f64 = 0.002;

/// A peak must exceed the lowest value on each side (within
/// [`PROMINENCE_REACH`] bins) by this factor.
pub const PEAK_PROMINENCE: f64 = 1.1;

/// How many bins on each side of a peak the prominence check inspects.
pub const PROMINENCE_REACH: usize = 2;

/// Number of peaks retained, tallest first.
pub const MAX_PEAKS: usize = 3;

/// Upper bound (inclusive) of the near-black bins.
pub const BLACK_MAX: usize = 10;

/// Lower bound (inclusive) of the near-white bins.
pub const WHITE_MIN: usize = 245;

/// Minimum distance between the two tallest peaks for a valley depth.
pub const MIN_VALLEY_SEPARATION: usize = 5;

/// The valley floor must be below this fraction of the lower peak.
pub const VALLEY_FLOOR_RATIO: f64 = 0.9;

/// Count the R channel of every pixel into 256 bins.
#[must_use]
pub fn histogram(image: &RgbaImage) -> Histogram {
    let mut bins = [0u32; HISTOGRAM_BINS];
    for pixel in image.pixels() {
        bins[usize::from(pixel.0[0])] += 1;
    }
    Histogram::new(bins)
}

/// Mean and population standard deviation of a histogram.
///
/// An empty histogram yields `(128.0, 0.0)`. This is a documented
/// fallback, not an error.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_std_dev(histogram: &Histogram) -> (f64, f64) {
    let total = histogram.total();
    if total == 0 {
        return (128.0, 0.0);
    }
    let n = total as f64;
    let mean = (0u32..)
        .zip(histogram.bins().iter())
        .map(|(level, &count)| f64::from(level) * f64::from(count))
        .sum::<f64>()
        / n;
    let variance = (0u32..)
        .zip(histogram.bins().iter())
        .map(|(level, &count)| {
            let d = f64::from(level) - mean;
            d * d * f64::from(count)
        })
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

/// Median gray level: the first bin where the cumulative count reaches
/// half of the total. An empty histogram yields 128.
#[must_use]
pub fn median(histogram: &Histogram) -> u8 {
    let total = histogram.total();
    if total == 0 {
        return 128;
    }
    let mut cumulative: u64 = 0;
    for (level, &count) in (0..=u8::MAX).zip(histogram.bins().iter()) {
        cumulative += u64::from(count);
        if cumulative * 2 >= total {
            return level;
        }
    }
    u8::MAX
}

/// Full statistics of a grayscale image.
#[must_use]
pub fn stats(image: &RgbaImage) -> ImageStats {
    stats_from_histogram(histogram(image))
}

/// Statistics derived from an already computed histogram.
#[must_use]
pub fn stats_from_histogram(histogram: Histogram) -> ImageStats {
    let (mean, std_dev) = mean_std_dev(&histogram);
    let features = analyze_histogram_features(&histogram);
    ImageStats {
        mean,
        std_dev,
        histogram,
        peaks: features.peaks,
        valleys: features.valleys,
    }
}

/// Normalize a histogram and smooth it with a centered moving average.
///
/// The window is clipped at both ends and averaged over the bins it
/// actually covers.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn smoothed(histogram: &Histogram) -> [f64; HISTOGRAM_BINS] {
    let total = histogram.total();
    let mut normalized = [0.0f64; HISTOGRAM_BINS];
    if total == 0 {
        return normalized;
    }
    let n = total as f64;
    for (slot, &count) in normalized.iter_mut().zip(histogram.bins().iter()) {
        *slot = f64::from(count) / n;
    }

    let half = SMOOTHING_WINDOW / 2;
    let mut out = [0.0f64; HISTOGRAM_BINS];
    for (i, slot) in out.iter_mut().enumerate() {
        let lo = i.saturating_sub(half);
        let hi = (i + half).min(HISTOGRAM_BINS - 1);
        let window = &normalized[lo..=hi];
        *slot = window.iter().sum::<f64>() / window.len() as f64;
    }
    out
}

/// Fraction of pixels in the near-black or near-white bins.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bw_ratio(histogram: &Histogram) -> f64 {
    let total = histogram.total();
    if total == 0 {
        return 0.0;
    }
    let bins = histogram.bins();
    let extremes: u64 = bins[..=BLACK_MAX]
        .iter()
        .chain(&bins[WHITE_MIN..])
        .map(|&c| u64::from(c))
        .sum();
    extremes as f64 / total as f64
}

/// Lowest smoothed value in `range`, or 0 when the range is empty
/// (off the end of the histogram).
fn floor_of(smooth: &[f64; HISTOGRAM_BINS], range: std::ops::Range<usize>) -> f64 {
    smooth[range].iter().copied().reduce(f64::min).unwrap_or(0.0)
}

/// Locate prominent local maxima of the smoothed histogram.
///
/// Flat tops are treated as one peak located at the middle of the flat
/// run. A peak must be taller than [`MIN_PEAK_HEIGHT`] and at least
/// [`PEAK_PROMINENCE`] times the lowest value within
/// [`PROMINENCE_REACH`] bins on each side. Returns at most
/// [`MAX_PEAKS`] peaks, tallest first.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn find_peaks(smooth: &[f64; HISTOGRAM_BINS]) -> Vec<Peak> {
    let last = HISTOGRAM_BINS - 1;
    let mut peaks = Vec::new();
    let mut start = 0;
    while start <= last {
        let height = smooth[start];
        let mut end = start;
        while end < last && smooth[end + 1] == height {
            end += 1;
        }

        let rises_from_left = start == 0 || smooth[start - 1] < height;
        let falls_to_right = end == last || smooth[end + 1] < height;

        if rises_from_left && falls_to_right && height > MIN_PEAK_HEIGHT {
            let left_floor = floor_of(smooth, start.saturating_sub(PROMINENCE_REACH)..start);
            let right_floor = floor_of(
                smooth,
                (end + 1).min(HISTOGRAM_BINS)..(end + 1 + PROMINENCE_REACH).min(HISTOGRAM_BINS),
            );
            if height >= left_floor * PEAK_PROMINENCE && height >= right_floor * PEAK_PROMINENCE {
                let center = (start + end) / 2;
                peaks.push(Peak {
                    position: u8::try_from(center).unwrap_or(u8::MAX),
                    height,
                });
            }
        }
        start = end + 1;
    }

    peaks.sort_by(|a, b| {
        b.height
            .total_cmp(&a.height)
            .then(a.position.cmp(&b.position))
    });
    peaks.truncate(MAX_PEAKS);
    peaks
}

/// Deepest point strictly between two gray levels, if any bin lies between.
fn valley_between(smooth: &[f64; HISTOGRAM_BINS], a: u8, b: u8) -> Option<(u8, f64)> {
    let (lo, hi) = (usize::from(a.min(b)), usize::from(a.max(b)));
    (lo + 1..hi)
        .map(|i| (i, smooth[i]))
        .min_by(|x, y| x.1.total_cmp(&y.1))
        .map(|(i, v)| (u8::try_from(i).unwrap_or(u8::MAX), v))
}

/// Extract peaks, valleys, black/white ratio and valley depth.
#[must_use]
pub fn analyze_histogram_features(histogram: &Histogram) -> HistogramFeatures {
    if histogram.total() == 0 {
        return HistogramFeatures::default();
    }
    let smooth = smoothed(histogram);
    let peaks = find_peaks(&smooth);

    let mut by_position: Vec<u8> = peaks.iter().map(|p| p.position).collect();
    by_position.sort_unstable();
    let valleys = by_position
        .windows(2)
        .filter_map(|pair| valley_between(&smooth, pair[0], pair[1]).map(|(pos, _)| pos))
        .collect();

    let valley_depth = match peaks.as_slice() {
        [first, second, ..]
            if usize::from(first.position.abs_diff(second.position)) >= MIN_VALLEY_SEPARATION =>
         {
            let lower = first.height.min(second.height);
            valley_between(&smooth, first.position, second.position)
                .filter(|&(_, floor)| floor < lower * VALLEY_FLOOR_RATIO)
                .map_or(0.0, |(_, floor)| 1.0 - floor / lower)
        }
        _ => 0.0,
    };

    HistogramFeatures {
        peaks,
        valleys,
        bw_ratio: bw_ratio(histogram),
        valley_depth,
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    fn gray(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            let v = f(x, y);
            Rgba([v, v, v, 255])
        })
    }

    fn hist_from(pairs: &[(usize, u32)]) -> Histogram {
        let mut bins = [0u32; HISTOGRAM_BINS];
        for &(i, c) in pairs {
            bins[i] = c;
        }
        Histogram::new(bins)
    }

    #[test]
    fn histogram_sums_to_pixel_count() {
        let img = gray(37, 19, |x, y| ((x * 7 + y * 13) % 256) as u8);
        assert_eq!(histogram(&img).total(), 37 * 19);
    }

    #[test]
    fn histogram_counts_red_channel() {
        let img = RgbaImage::from_fn(2, 1, |x, _| Rgba([if x == 0 { 9 } else { 200 }, 1, 2, 255]));
        let h = histogram(&img);
        assert_eq!(h.bins()[9], 1);
        assert_eq!(h.bins()[200], 1);
        assert_eq!(h.bins()[1], 0);
    }

    #[test]
    fn empty_histogram_uses_fallback_stats() {
        let (mean, std) = mean_std_dev(&Histogram::default());
        assert!((mean - 128.0).abs() < f64::EPSILON);
        assert!(std.abs() < f64::EPSILON);
        assert_eq!(median(&Histogram::default()), 128);
    }

    #[test]
    fn mean_and_std_dev_of_two_levels() {
        let (mean, std) = mean_std_dev(&hist_from(&[(0, 50), (200, 50)]));
        assert!((mean - 100.0).abs() < 1e-9);
        assert!((std - 100.0).abs() < 1e-9);
    }

    #[test]
    fn median_reaches_half() {
        assert_eq!(median(&hist_from(&[(10, 3), (50, 3), (90, 4)])), 50);
        assert_eq!(median(&hist_from(&[(10, 1), (50, 1)])), 10);
    }

    #[test]
    fn uniform_gray_has_single_centered_peak() {
        let s = stats(&gray(16, 16, |_, _| 128));
        assert!(s.std_dev.abs() < f64::EPSILON);
        assert!((s.mean - 128.0).abs() < f64::EPSILON);
        assert_eq!(s.peaks.len(), 1);
        assert_eq!(s.peaks[0].position, 128);
        assert!(s.valleys.is_empty());
    }

    #[test]
    fn bimodal_histogram_has_two_peaks_and_a_valley() {
        let h = hist_from(&[(40, 500), (200, 500)]);
        let f = analyze_histogram_features(&h);
        assert_eq!(f.peak_count(), 2);
        let mut positions: Vec<u8> = f.peaks.iter().map(|p| p.position).collect();
        positions.sort_unstable();
        assert_eq!(positions, vec![40, 200]);
        assert_eq!(f.valleys.len(), 1);
        assert!(f.valleys[0] > 40 && f.valleys[0] < 200);
        assert!((f.valley_depth - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tiny_peaks_are_ignored() {
        // 1 pixel in 10 000 at gray 30 is below the height threshold.
        let h = hist_from(&[(30, 1), (180, 9_999)]);
        let f = analyze_histogram_features(&h);
        assert_eq!(f.peak_count(), 1);
        assert_eq!(f.peaks[0].position, 180);
    }

    #[test]
    fn at_most_three_peaks_tallest_first() {
        let h = hist_from(&[(20, 100), (70, 400), (120, 200), (170, 300), (220, 50)]);
        let f = analyze_histogram_features(&h);
        assert_eq!(f.peak_count(), 3);
        assert_eq!(f.peaks[0].position, 70);
        assert_eq!(f.peaks[1].position, 170);
        assert_eq!(f.peaks[2].position, 120);
    }

    #[test]
    fn shallow_plateau_between_peaks_has_no_valley_depth() {
        // Two narrow spikes standing on a broad plateau: the floor between
        // them stays above 90% of the lower peak.
        let mut pairs: Vec<(usize, u32)> = (40..=131).map(|i| (i, 44)).collect();
        pairs.extend([(60, 68), (110, 68)]);
        let h = hist_from(&pairs);
        assert_eq!(h.total(), 4096);

        let f = analyze_histogram_features(&h);
        let positions: Vec<u8> = f.peaks.iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![60, 110]);
        assert_eq!(f.valleys.len(), 1);
        assert!(f.valley_depth.abs() < f64::EPSILON);
    }

    #[test]
    fn close_peaks_have_no_valley_depth() {
        let h = hist_from(&[(100, 500), (103, 500)]);
        let f = analyze_histogram_features(&h);
        assert!(f.valley_depth.abs() < f64::EPSILON);
    }

    #[test]
    fn black_white_image_has_full_bw_ratio() {
        let img = gray(10, 10, |x, y| if (x + y) % 2 == 0 { 0 } else { 255 });
        let f = analyze_histogram_features(&histogram(&img));
        assert!((f.bw_ratio - 1.0).abs() < f64::EPSILON);
        let positions: Vec<u8> = f.peaks.iter().map(|p| p.position).collect();
        assert!(positions.contains(&0));
        assert!(positions.contains(&255));
    }

    #[test]
    fn bw_ratio_counts_both_extremes_only() {
        let h = hist_from(&[(10, 1), (11, 1), (244, 1), (245, 1)]);
        assert!((bw_ratio(&h) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn smoothing_preserves_mass_away_from_edges() {
        let h = hist_from(&[(100, 7), (150, 3)]);
        let total: f64 = smoothed(&h).iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
