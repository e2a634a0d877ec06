//! Sobel edge map and long-edge component detection.
//!
//! Wraps [`imageproc::gradients`] to compute the 3x3 Sobel gradient of
//! the gray channel. Only interior pixels are scored: the outermost row
//! and column have no full neighborhood and are never marked as edges.
//!
//! Long edges are connected runs of edge pixels that span a wide
//! bounding box while covering little of it. Straight and engineered
//! lines typical of line art produce them; photographic texture mostly
//! does not.

use crate::grayscale::gray_channel;
use crate::region::{EIGHT_CONNECTED, FLOOD_FILL_CAP, Grid};
use crate::types::RgbaImage;

/// Sobel magnitude above which a pixel is an edge.
pub const EDGE_THRESHOLD: f64 = 20.0;

/// Sobel magnitude above which an edge is distinct.
pub const DISTINCT_EDGE_THRESHOLD: f64 = 50.0;

/// A long-edge component must have more than this many pixels.
pub const LONG_EDGE_MIN_SIZE: usize = 15;

/// A long-edge bounding box must exceed this extent on at least one axis.
pub const LONG_EDGE_MIN_EXTENT: usize = 20;

/// A long-edge component must fill less than this fraction of its
/// bounding box, unless it is larger than [`LONG_EDGE_RAW_SIZE`].
pub const LONG_EDGE_MAX_DENSITY: f64 = 0.5;

/// Components larger than this count as long regardless of density.
pub const LONG_EDGE_RAW_SIZE: usize = 30;

/// Per-pixel Sobel magnitudes of an image.
#[derive(Debug, Clone)]
pub struct EdgeMap {
    width: usize,
    height: usize,
    magnitudes: Vec<f64>,
}

impl EdgeMap {
    /// Map width in pixels.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Map height in pixels.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Whether the pixel at `index` is an edge.
    #[must_use]
    pub fn is_edge(&self, index: usize) -> bool {
        self.magnitudes[index] > EDGE_THRESHOLD
    }

    /// Total pixel count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    /// Whether the map has no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }
}

/// Compute the Sobel magnitude `sqrt(gx² + gy²)` of the gray channel.
#[must_use]
pub fn sobel(image: &RgbaImage) -> EdgeMap {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let mut magnitudes = vec![0.0; width * height];

    if width >= 3 && height >= 3 {
        let gray = gray_channel(image);
        let gx = imageproc::gradients::horizontal_sobel(&gray);
        let gy = imageproc::gradients::vertical_sobel(&gray);
        for y in 1..height - 1 {
            for x in 1..width - 1 {
                // In range: x < width and y < height, both from u32.
                #[allow(clippy::cast_possible_truncation)]
                let (px, py) = (x as u32, y as u32);
                let h = f64::from(gx.get_pixel(px, py).0[0]);
                let v = f64::from(gy.get_pixel(px, py).0[0]);
                magnitudes[y * width + x] = h.hypot(v);
            }
        }
    }

    EdgeMap {
        width,
        height,
        magnitudes,
    }
}

/// Aggregate edge statistics of an [`EdgeMap`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EdgeStats {
    /// Pixels above [`EDGE_THRESHOLD`].
    pub edge_count: usize,
    /// Pixels above [`DISTINCT_EDGE_THRESHOLD`].
    pub distinct_count: usize,
    /// `edge_count / total pixels`.
    pub edge_ratio: f64,
    /// `distinct_count / total pixels`.
    pub distinct_edge_ratio: f64,
    /// Mean magnitude over edge pixels (0 without edges).
    pub edge_contrast: f64,
}

/// Count edges and measure their mean strength.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn edge_stats(map: &EdgeMap) -> EdgeStats {
    if map.is_empty() {
        return EdgeStats::default();
    }
    let mut edge_count = 0usize;
    let mut distinct_count = 0usize;
    let mut magnitude_sum = 0.0;
    for &m in &map.magnitudes {
        if m > EDGE_THRESHOLD {
            edge_count += 1;
            magnitude_sum += m;
            if m > DISTINCT_EDGE_THRESHOLD {
                distinct_count += 1;
            }
        }
    }
    let total = map.len() as f64;
    EdgeStats {
        edge_count,
        distinct_count,
        edge_ratio: edge_count as f64 / total,
        distinct_edge_ratio: distinct_count as f64 / total,
        edge_contrast: if edge_count == 0 {
            0.0
        } else {
            magnitude_sum / edge_count as f64
        },
    }
}

/// Long-edge components found in an edge map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LongEdges {
    /// Number of qualifying components.
    pub count: u32,
    /// Edge pixels belonging to qualifying components.
    pub pixels: usize,
}

/// Whether a filled edge component counts as a long edge.
fn is_long_edge(region: &crate::region::Region) -> bool {
    region.size > LONG_EDGE_MIN_SIZE
        && (region.width() > LONG_EDGE_MIN_EXTENT || region.height() > LONG_EDGE_MIN_EXTENT)
        && (region.density() < LONG_EDGE_MAX_DENSITY || region.size > LONG_EDGE_RAW_SIZE)
}

/// Find long-edge components with an 8-connected, capped flood fill.
#[must_use]
pub fn long_edges(map: &EdgeMap) -> LongEdges {
    let mut grid = Grid::new(map.width, map.height);
    let mut found = LongEdges::default();
    for start in 0..map.len() {
        if !map.is_edge(start) || grid.is_visited(start) {
            continue;
        }
        let region = grid.fill(start, &EIGHT_CONNECTED, FLOOD_FILL_CAP, |i| map.is_edge(i));
        if is_long_edge(&region) {
            found.count += 1;
            found.pixels += region.size;
        }
    }
    found
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

    #[test]
    fn uniform_image_has_no_edges() {
        let map = sobel(&gray(20, 20, |_, _| 128));
        let stats = edge_stats(&map);
        assert_eq!(stats.edge_count, 0);
        assert!(stats.edge_contrast.abs() < f64::EPSILON);
        assert_eq!(long_edges(&map), LongEdges::default());
    }

    #[test]
    fn border_pixels_are_never_edges() {
        let map = sobel(&gray(10, 10, |x, _| if x == 0 { 0 } else { 255 }));
        for y in 0..10 {
            assert!(!map.is_edge(y * 10));
            assert!(!map.is_edge(y * 10 + 9));
        }
        // The interior column next to the step sees the gradient.
        assert!(map.is_edge(5 * 10 + 1));
    }

    #[test]
    fn sharp_step_is_distinct() {
        let map = sobel(&gray(20, 20, |x, _| if x < 10 { 0 } else { 255 }));
        let stats = edge_stats(&map);
        assert!(stats.distinct_count > 0);
        assert!(stats.edge_contrast > DISTINCT_EDGE_THRESHOLD);
        assert!(stats.distinct_edge_ratio <= stats.edge_ratio);
    }

    #[test]
    fn tiny_images_produce_empty_maps() {
        let map = sobel(&gray(2, 2, |x, _| if x == 0 { 0 } else { 255 }));
        assert_eq!(edge_stats(&map).edge_count, 0);
        let empty = sobel(&RgbaImage::new(0, 0));
        assert!(empty.is_empty());
        assert_eq!(edge_stats(&empty), EdgeStats::default());
    }

    #[test]
    fn long_vertical_line_is_a_long_edge() {
        // A thin dark line spanning 40 rows.
        let map = sobel(&gray(40, 50, |x, y| if x == 20 && (5..45).contains(&y) { 0 } else { 255 }));
        let found = long_edges(&map);
        assert!(found.count >= 1);
        assert!(found.pixels > LONG_EDGE_MIN_SIZE);
    }

    #[test]
    fn small_blob_is_not_a_long_edge() {
        let map = sobel(&gray(30, 30, |x, y| {
            if (12..15).contains(&x) && (12..15).contains(&y) { 0 } else { 255 }
        }));
        assert!(edge_stats(&map).edge_count > 0);
        assert_eq!(long_edges(&map).count, 0);
    }
}
