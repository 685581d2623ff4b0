// THEORY:
// Total interest is the single similarity number the matcher ranks pairs by. It
// blends two proximity terms, each a linear ramp from 1 (coincident) down to 0
// (at or beyond the configured displacement limit):
//
//   centroid_interest = max(0, (Dc - |c_t - c_f|) / Dc)
//   boundary_interest = max(0, (Db - min_dist(cells_t, cells_f)) / Db)
//   total             = (centroid_interest + boundary_interest) / 2
//
// optionally scaled by the ratio of the smaller to the larger area. Every term is
// symmetric in its two objects, so `score(a, b) == score(b, a)`, and all of them
// are clamped so the result stays in [0, 1] even for degenerate objects.

use crate::core_modules::storm_object::StormObject;
use serde::{Deserialize, Serialize};

/// Displacement limits (grid units) and the weighting variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterestParams {
    pub max_centroid_disp: f64,
    pub max_bound_disp: f64,
    pub area_ratio_weighting: bool,
}

impl InterestParams {
    pub fn new(max_centroid_disp: f64, max_bound_disp: f64) -> Self {
        Self {
            max_centroid_disp,
            max_bound_disp,
            area_ratio_weighting: false,
        }
    }

    pub fn with_area_ratio(mut self, enabled: bool) -> Self {
        self.area_ratio_weighting = enabled;
        self
    }
}

/// The full breakdown of one pairwise comparison.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InterestScore {
    pub centroid_interest: f64,
    pub boundary_interest: f64,
    pub total_interest: f64,
    /// Centroid separation in grid cells.
    pub centroid_distance: f64,
    /// Minimum cell-to-cell separation in grid cells. Capped at the boundary limit
    /// for pairs that are out of range.
    pub boundary_distance: f64,
    pub area_ratio: f64,
}

/// Linear proximity ramp, clamped to [0, 1].
fn ramp(limit: f64, distance: f64) -> f64 {
    if !(limit > 0.0) || !distance.is_finite() {
        return 0.0;
    }
    ((limit - distance) / limit).clamp(0.0, 1.0)
}

/// min(area) / max(area); two empty objects count as equal.
pub fn area_ratio(a: &StormObject, b: &StormObject) -> f64 {
    let (lo, hi) = if a.area <= b.area {
        (a.area, b.area)
    } else {
        (b.area, a.area)
    };
    if hi == 0 { 1.0 } else { lo as f64 / hi as f64 }
}

/// Scores a truth/forecast pair. Argument order does not matter.
pub fn score(truth: &StormObject, forecast: &StormObject, params: &InterestParams) -> InterestScore {
    let centroid_distance = truth.centroid_distance(forecast);
    let boundary_distance = truth
        .boundary_distance_within(forecast, params.max_bound_disp)
        .min(params.max_bound_disp.max(0.0));

    let centroid_interest = ramp(params.max_centroid_disp, centroid_distance);
    let boundary_interest = ramp(params.max_bound_disp, boundary_distance);
    let ratio = area_ratio(truth, forecast);

    let mut total_interest = 0.5 * (centroid_interest + boundary_interest);
    if params.area_ratio_weighting {
        total_interest *= ratio;
    }

    InterestScore {
        centroid_interest,
        boundary_interest,
        total_interest: total_interest.clamp(0.0, 1.0),
        centroid_distance,
        boundary_distance,
        area_ratio: ratio,
    }
}
