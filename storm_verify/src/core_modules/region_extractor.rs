// THEORY:
// The region extractor is the bridge between a gridded field and the object world.
// The engine consumes it through the `RegionExtractor` trait, so any labeling
// library can stand behind it; `ThresholdRegionExtractor` is the reference
// implementation used by the runner.
//
// Algorithm steps:
// 1.  **Detection mask**: every cell at or above the detection floor is a
//     candidate. Everything below it is background.
// 2.  **Region growing**: an unvisited candidate seeds a flood fill over its
//     8 neighbours, collecting one connected region.
// 3.  **Two-stage acceptance**: a region survives only if it covers at least
//     `area_thresh` cells *and* its peak intensity reaches the required peak. The
//     low floor defines the object's extent; the high peak decides whether it is
//     a storm at all.
// 4.  **Shape statistics**: surviving regions are summarized by their intensity
//     extrema, second-moment ellipse (axis lengths, eccentricity, orientation)
//     and solidity against the convex hull of their cells.

use crate::core_modules::config::IntensityThresholds;
use crate::core_modules::field::Field;
use crate::core_modules::storm_object::{GridPoint, ShapeStats, StormObject};

/// Thresholds applied by one extraction call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionThresholds {
    pub area_thresh: usize,
    pub intensity: IntensityThresholds,
}

/// Converts a field into labeled storm objects.
pub trait RegionExtractor: Send + Sync {
    fn extract(&self, field: &Field, thresholds: &ExtractionThresholds) -> Vec<StormObject>;
}

/// 8-connected threshold labeling with two-stage intensity acceptance.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdRegionExtractor;

impl RegionExtractor for ThresholdRegionExtractor {
    fn extract(&self, field: &Field, thresholds: &ExtractionThresholds) -> Vec<StormObject> {
        let floor = thresholds.intensity.detection_floor;
        let mut visited = vec![false; field.rows * field.cols];
        let mut objects = Vec::new();

        for row in 0..field.rows {
            for col in 0..field.cols {
                if visited[row * field.cols + col] || !(field.get(row, col) >= floor) {
                    continue;
                }
                let cells = labeling::grow_region(field, floor, row, col, &mut visited);
                let values: Vec<f64> = cells
                    .iter()
                    .map(|p| field.get(p.row as usize, p.col as usize))
                    .collect();
                let peak = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

                if cells.len() < thresholds.area_thresh || peak < thresholds.intensity.required_peak {
                    continue;
                }

                let stats = moments::shape_stats(&cells, &values);
                objects.push(StormObject::from_cells(objects.len() as u32 + 1, cells, stats));
            }
        }

        objects
    }
}

pub mod labeling {
    use super::*;

    const NEIGHBOURS: [(i32, i32); 8] = [
        (-1, -1),
        (-1, 0),
        (-1, 1),
        (0, -1),
        (0, 1),
        (1, -1),
        (1, 0),
        (1, 1),
    ];

    /// Flood fill from (`row`, `col`) over cells at or above `floor`.
    pub fn grow_region(
        field: &Field,
        floor: f64,
        row: usize,
        col: usize,
        visited: &mut [bool],
    ) -> Vec<GridPoint> {
        let mut region = Vec::new();
        let mut stack = vec![GridPoint::new(row as i32, col as i32)];
        visited[row * field.cols + col] = true;

        while let Some(current) = stack.pop() {
            region.push(current);
            for (dr, dc) in NEIGHBOURS {
                let nr = current.row + dr;
                let nc = current.col + dc;
                if nr < 0 || nc < 0 || nr >= field.rows as i32 || nc >= field.cols as i32 {
                    continue;
                }
                let (nr_u, nc_u) = (nr as usize, nc as usize);
                let index = nr_u * field.cols + nc_u;
                if !visited[index] && field.get(nr_u, nc_u) >= floor {
                    visited[index] = true;
                    stack.push(GridPoint::new(nr, nc));
                }
            }
        }

        region.sort();
        region
    }
}

pub mod moments {
    use super::*;

    /// Intensity and shape statistics of a region.
    pub fn shape_stats(cells: &[GridPoint], values: &[f64]) -> ShapeStats {
        let n = cells.len();
        if n == 0 {
            return ShapeStats::default();
        }
        let nf = n as f64;

        let max_intensity = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean_intensity = values.iter().sum::<f64>() / nf;

        let (mean_r, mean_c) = cells
            .iter()
            .fold((0.0, 0.0), |(r, c), p| (r + p.row as f64, c + p.col as f64));
        let (mean_r, mean_c) = (mean_r / nf, mean_c / nf);

        let (mut mu_rr, mut mu_cc, mut mu_rc) = (0.0, 0.0, 0.0);
        for p in cells {
            let dr = p.row as f64 - mean_r;
            let dc = p.col as f64 - mean_c;
            mu_rr += dr * dr;
            mu_cc += dc * dc;
            mu_rc += dr * dc;
        }
        mu_rr /= nf;
        mu_cc /= nf;
        mu_rc /= nf;

        let half_trace = 0.5 * (mu_rr + mu_cc);
        let spread = (0.25 * (mu_rr - mu_cc).powi(2) + mu_rc * mu_rc).sqrt();
        let l1 = half_trace + spread;
        let l2 = (half_trace - spread).max(0.0);

        let eccentricity = if l1 > 0.0 { (1.0 - l2 / l1).sqrt() } else { 0.0 };

        ShapeStats {
            max_intensity,
            mean_intensity,
            major_axis_length: 4.0 * l1.sqrt(),
            minor_axis_length: 4.0 * l2.sqrt(),
            eccentricity,
            orientation: 0.5 * (2.0 * mu_rc).atan2(mu_rr - mu_cc),
            solidity: (nf / hull_area(cells)).min(1.0),
        }
    }

    /// Area of the convex hull of the unit squares covering `cells`.
    pub fn hull_area(cells: &[GridPoint]) -> f64 {
        let mut corners: Vec<(i64, i64)> = cells
            .iter()
            .flat_map(|p| {
                let (r, c) = (p.row as i64, p.col as i64);
                [(r, c), (r + 1, c), (r, c + 1), (r + 1, c + 1)]
            })
            .collect();
        corners.sort_unstable();
        corners.dedup();
        if corners.len() < 3 {
            return 0.0;
        }

        let cross = |o: (i64, i64), a: (i64, i64), b: (i64, i64)| {
            (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
        };

        // Andrew's monotone chain.
        let mut hull: Vec<(i64, i64)> = Vec::with_capacity(2 * corners.len());
        for &p in corners.iter() {
            while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0 {
                hull.pop();
            }
            hull.push(p);
        }
        let lower_len = hull.len() + 1;
        for &p in corners.iter().rev().skip(1) {
            while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0 {
                hull.pop();
            }
            hull.push(p);
        }
        hull.pop();

        let twice_area: i64 = (0..hull.len())
            .map(|i| {
                let (a, b) = (hull[i], hull[(i + 1) % hull.len()]);
                a.0 * b.1 - b.0 * a.1
            })
            .sum();
        twice_area.abs() as f64 / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds(area: usize) -> ExtractionThresholds {
        ExtractionThresholds {
            area_thresh: area,
            intensity: IntensityThresholds::new(40.0, 45.0),
        }
    }

    fn paint(field: &mut Field, row: usize, col: usize, h: usize, w: usize, value: f64) {
        for r in row..row + h {
            for c in col..col + w {
                field.set(r, c, value);
            }
        }
    }

    #[test]
    fn extracts_separate_regions() {
        let mut field = Field::filled(20, 20, 0.0);
        paint(&mut field, 2, 2, 3, 3, 50.0);
        paint(&mut field, 10, 10, 4, 2, 48.0);
        let objects = ThresholdRegionExtractor.extract(&field, &thresholds(1));
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].id, 1);
        assert_eq!(objects[0].area, 9);
        assert_eq!(objects[0].centroid, (3.0, 3.0));
        assert_eq!(objects[1].area, 8);
        assert_eq!(objects[1].stats.max_intensity, 48.0);
    }

    #[test]
    fn diagonal_cells_are_connected() {
        let mut field = Field::filled(5, 5, 0.0);
        field.set(0, 0, 50.0);
        field.set(1, 1, 50.0);
        field.set(2, 2, 50.0);
        let objects = ThresholdRegionExtractor.extract(&field, &thresholds(1));
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].area, 3);
    }

    #[test]
    fn two_stage_and_area_filters() {
        let mut field = Field::filled(20, 20, 0.0);
        // Large but never reaches the required peak.
        paint(&mut field, 0, 0, 5, 5, 42.0);
        // Intense but too small.
        paint(&mut field, 10, 10, 1, 2, 60.0);
        // Weak shell around an intense core: kept, extent set by the low floor.
        paint(&mut field, 12, 0, 4, 4, 41.0);
        field.set(13, 1, 55.0);
        let objects = ThresholdRegionExtractor.extract(&field, &thresholds(4));
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].area, 16);
        assert_eq!(objects[0].stats.max_intensity, 55.0);
    }

    #[test]
    fn shape_of_bar() {
        let cells: Vec<GridPoint> = (0..10).map(|c| GridPoint::new(0, c)).collect();
        let stats = moments::shape_stats(&cells, &vec![50.0; 10]);
        assert!(stats.major_axis_length > stats.minor_axis_length);
        assert!(stats.minor_axis_length < 1e-6);
        assert!((stats.eccentricity - 1.0).abs() < 1e-6);
        assert!((stats.orientation.abs() - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert_eq!(stats.solidity, 1.0);
    }

    #[test]
    fn solidity_of_l_shape() {
        let cells = vec![
            GridPoint::new(0, 0),
            GridPoint::new(1, 0),
            GridPoint::new(1, 1),
        ];
        // Hull of the three unit squares is the 2x2 square minus a corner triangle.
        assert_eq!(moments::hull_area(&cells), 3.5);
        let stats = moments::shape_stats(&cells, &[50.0; 3]);
        assert!((stats.solidity - 3.0 / 3.5).abs() < 1e-12);
    }
}
