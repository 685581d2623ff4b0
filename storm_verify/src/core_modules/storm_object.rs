// THEORY:
// A `StormObject` is one spatially contiguous, thresholded region of a radar or
// forecast field at a single valid time. It is the unit every later layer works
// with: the truth tracker ages it, the matcher scores it against objects from the
// other source, and the outcome records copy its attributes.
//
// Key architectural principles:
// 1.  **Snapshot, not track**: an object describes one region at one time. Its
//     `id` is only unique within (source, valid time). The one piece of history it
//     carries is `age`, which the truth tracker derives when the object is built.
// 2.  **Immutable after extraction**: the matcher only ever reads objects.
// 3.  **Geometry kept whole**: the full member-cell list is retained because the
//     boundary interest needs the minimum distance between two regions, not just
//     the distance between their centroids. The bounding box is kept alongside so
//     that distant pairs can be rejected without touching the cell lists.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One grid cell, addressed by row and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPoint {
    pub row: i32,
    pub col: i32,
}

impl GridPoint {
    pub fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    pub fn distance_sq(&self, other: &GridPoint) -> f64 {
        let dr = (self.row - other.row) as f64;
        let dc = (self.col - other.col) as f64;
        dr * dr + dc * dc
    }
}

/// Inclusive bounding box of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_row: i32,
    pub min_col: i32,
    pub max_row: i32,
    pub max_col: i32,
}

impl BoundingBox {
    pub fn from_points(points: &[GridPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = Self {
            min_row: first.row,
            min_col: first.col,
            max_row: first.row,
            max_col: first.col,
        };
        for p in &points[1..] {
            bbox.min_row = bbox.min_row.min(p.row);
            bbox.min_col = bbox.min_col.min(p.col);
            bbox.max_row = bbox.max_row.max(p.row);
            bbox.max_col = bbox.max_col.max(p.col);
        }
        Some(bbox)
    }

    /// Lower bound on the distance between any cell of `self` and any cell of `other`.
    pub fn gap_distance(&self, other: &BoundingBox) -> f64 {
        let dr = (other.min_row - self.max_row)
            .max(self.min_row - other.max_row)
            .max(0) as f64;
        let dc = (other.min_col - self.max_col)
            .max(self.min_col - other.max_col)
            .max(0) as f64;
        (dr * dr + dc * dc).sqrt()
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.gap_distance(other) == 0.0
    }
}

/// Shape and intensity statistics of one region, as produced by a region extractor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ShapeStats {
    pub max_intensity: f64,
    pub mean_intensity: f64,
    pub major_axis_length: f64,
    pub minor_axis_length: f64,
    pub eccentricity: f64,
    /// Angle in radians between the row axis and the major axis.
    pub orientation: f64,
    /// Region area divided by the area of its convex hull.
    pub solidity: f64,
}

/// A single thresholded storm region at one valid time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormObject {
    /// Unique within (source, valid time). Not persistent across times.
    pub id: u32,
    /// Number of member grid cells.
    pub area: usize,
    /// (row, col) centroid in grid-cell coordinates.
    pub centroid: (f64, f64),
    pub stats: ShapeStats,
    /// Every member cell of the region.
    pub coords: Vec<GridPoint>,
    pub bbox: Option<BoundingBox>,
    /// Seconds since first detection. Only meaningful for truth objects.
    pub age: i64,
}

impl StormObject {
    /// Builds an object from its member cells. The area, centroid and bounding box
    /// are derived from `coords`.
    pub fn from_cells(id: u32, coords: Vec<GridPoint>, stats: ShapeStats) -> Self {
        let area = coords.len();
        let centroid = if area == 0 {
            (0.0, 0.0)
        } else {
            let (sr, sc) = coords
                .iter()
                .fold((0.0, 0.0), |(r, c), p| (r + p.row as f64, c + p.col as f64));
            (sr / area as f64, sc / area as f64)
        };
        let bbox = BoundingBox::from_points(&coords);
        Self {
            id,
            area,
            centroid,
            stats,
            coords,
            bbox,
            age: 0,
        }
    }

    pub fn with_age(mut self, age: i64) -> Self {
        self.age = age;
        self
    }

    pub fn centroid_distance(&self, other: &StormObject) -> f64 {
        let dr = self.centroid.0 - other.centroid.0;
        let dc = self.centroid.1 - other.centroid.1;
        (dr * dr + dc * dc).sqrt()
    }

    /// Minimum Euclidean distance between any member cell of `self` and any member
    /// cell of `other`. Zero when the regions share a cell; infinite when either
    /// region is empty.
    pub fn boundary_distance(&self, other: &StormObject) -> f64 {
        self.boundary_distance_within(other, f64::INFINITY)
    }

    /// Same as [`boundary_distance`](Self::boundary_distance), but returns `limit`
    /// (or more) as soon as it is known the true distance is at least `limit`.
    pub fn boundary_distance_within(&self, other: &StormObject, limit: f64) -> f64 {
        let (Some(a), Some(b)) = (self.bbox, other.bbox) else {
            return f64::INFINITY;
        };
        let gap = a.gap_distance(&b);
        if gap >= limit {
            return gap;
        }

        let mut best_sq = f64::INFINITY;
        for p in &self.coords {
            for q in &other.coords {
                let d = p.distance_sq(q);
                if d < best_sq {
                    best_sq = d;
                    if best_sq == 0.0 {
                        return 0.0;
                    }
                }
            }
        }
        best_sq.sqrt()
    }

    /// True when the two regions share at least one grid cell.
    pub fn overlaps(&self, other: &StormObject) -> bool {
        match (self.bbox, other.bbox) {
            (Some(a), Some(b)) if a.intersects(&b) => {
                let (small, large) = if self.coords.len() <= other.coords.len() {
                    (self, other)
                } else {
                    (other, self)
                };
                let cells: HashSet<&GridPoint> = large.coords.iter().collect();
                small.coords.iter().any(|p| cells.contains(p))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_shapes {
    use super::*;

    /// A `size`×`size` square whose top-left cell is at (`row`, `col`).
    pub fn square(id: u32, row: i32, col: i32, size: i32) -> StormObject {
        let mut coords = Vec::new();
        for r in row..row + size {
            for c in col..col + size {
                coords.push(GridPoint::new(r, c));
            }
        }
        StormObject::from_cells(
            id,
            coords,
            ShapeStats {
                max_intensity: 50.0,
                mean_intensity: 45.0,
                solidity: 1.0,
                ..Default::default()
            },
        )
    }

    /// A square centred on (`row`, `col`) with odd side `size`.
    pub fn centered(id: u32, row: i32, col: i32, size: i32) -> StormObject {
        square(id, row - size / 2, col - size / 2, size)
    }
}
