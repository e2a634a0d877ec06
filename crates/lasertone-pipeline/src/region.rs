//! Bounded breadth-first flood fill over a row-major grid.
//!
//! Used to measure connected edge components and same-level color
//! blocks. Every fill stops after a fixed number of visited cells so the
//! cost on large uniform regions stays bounded.

use std::collections::VecDeque;

/// Maximum cells visited by a single fill.
pub const FLOOD_FILL_CAP: usize = 1000;

/// 4-connected neighbor offsets.
pub const FOUR_CONNECTED: [(isize, isize); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// 8-connected neighbor offsets.
pub const EIGHT_CONNECTED: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Size and bounding box of one filled region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Number of cells visited (at most the cap).
    pub size: usize,
    /// Leftmost column.
    pub min_x: usize,
    /// Rightmost column.
    pub max_x: usize,
    /// Top row.
    pub min_y: usize,
    /// Bottom row.
    pub max_y: usize,
}

impl Region {
    /// Bounding box width in cells.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.max_x - self.min_x + 1
    }

    /// Bounding box height in cells.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.max_y - self.min_y + 1
    }

    /// Fraction of the bounding box covered by the region.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn density(&self) -> f64 {
        self.size as f64 / (self.width() * self.height()) as f64
    }
}

/// A grid of `width * height` cells to flood fill.
pub struct Grid {
    width: usize,
    height: usize,
    visited: Vec<bool>,
}

impl Grid {
    /// Create a grid with nothing visited.
    #[must_use]
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            visited: vec![false; width * height],
        }
    }

    /// Whether a cell has already been claimed by a fill.
    #[must_use]
    pub fn is_visited(&self, index: usize) -> bool {
        self.visited[index]
    }

    /// Fill from `start` across neighbors for which `member` holds.
    ///
    /// Cells are claimed when enqueued, so no cell is counted twice.
    /// Stops once `cap` cells have been visited; unvisited members of a
    /// capped region remain available to later fills.
    pub fn fill(
        &mut self,
        start: usize,
        neighbors: &[(isize, isize)],
        cap: usize,
        member: impl Fn(usize) -> bool,
    ) -> Region {
        let (sx, sy) = (start % self.width, start / self.width);
        let mut region = Region {
            size: 0,
            min_x: sx,
            max_x: sx,
            min_y: sy,
            max_y: sy,
        };
        let mut queue = VecDeque::from([start]);
        self.visited[start] = true;

        while region.size < cap {
            let Some(index) = queue.pop_front() else {
                break;
            };
            let (x, y) = (index % self.width, index / self.width);
            region.size += 1;
            region.min_x = region.min_x.min(x);
            region.max_x = region.max_x.max(x);
            region.min_y = region.min_y.min(y);
            region.max_y = region.max_y.max(y);

            for &(dx, dy) in neighbors {
                let Some(nx) = x.checked_add_signed(dx) else {
                    continue;
                };
                let Some(ny) = y.checked_add_signed(dy) else {
                    continue;
                };
                if nx >= self.width || ny >= self.height {
                    continue;
                }
                let next = ny * self.width + nx;
                if !self.visited[next] && member(next) {
                    self.visited[next] = true;
                    queue.push_back(next);
                }
            }
        }

        // Cells still queued when the cap hit were claimed but not
        // counted; release them for later fills.
        for index in queue {
            self.visited[index] = false;
        }
        region
    }
}
