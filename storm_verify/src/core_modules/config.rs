// THEORY:
// All run parameters live in one `VerificationConfig`, loaded once per run from a
// JSON file and then shared read-only by every worker. Physical distances are
// configured in kilometres and converted to grid-cell units through `dx_km`, so
// the matcher itself only ever deals with grid units.

use crate::core_modules::error::{VerifyError, VerifyResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Two-stage intensity thresholds: a region is grown from every cell at or
/// above `detection_floor`, and is only kept if its peak reaches `required_peak`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntensityThresholds {
    pub detection_floor: f64,
    pub required_peak: f64,
}

impl IntensityThresholds {
    pub fn new(detection_floor: f64, required_peak: f64) -> Self {
        Self {
            detection_floor,
            required_peak,
        }
    }
}

impl Default for IntensityThresholds {
    fn default() -> Self {
        Self::new(40.0, 45.0)
    }
}

/// Where the raster source finds its fields.
///
/// Templates may contain the tokens `{date}` (YYYYMMDD of the case),
/// `{init}` and `{valid}` (YYYYMMDDHHMM) and `{member}` (zero-padded to 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldLayout {
    pub truth_template: String,
    pub forecast_template: String,
    /// Multiplier applied to each raw 16-bit pixel.
    pub scale: f64,
    /// Added after scaling.
    pub offset: f64,
}

impl Default for FieldLayout {
    fn default() -> Self {
        Self {
            truth_template: "truth/{date}/{valid}.png".to_string(),
            forecast_template: "forecast/{date}/{init}/mem{member}/{valid}.png".to_string(),
            scale: 0.01,
            offset: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Grid spacing in kilometres.
    pub dx_km: f64,
    pub max_centroid_dist_km: f64,
    pub max_boundary_dist_km: f64,
    /// Minimum object area in grid cells.
    pub area_thresh: usize,
    pub truth_thresholds: IntensityThresholds,
    pub forecast_thresholds: IntensityThresholds,
    /// Candidates at or below this total interest are discarded.
    pub ti_thresh: f64,
    /// Multiply total interest by min(area)/max(area).
    pub area_ratio_weighting: bool,
    pub max_match_iterations: usize,
    /// Spacing of valid times and the age increment between them.
    pub time_step_seconds: i64,
    pub forecast_length_minutes: i64,
    pub members: Vec<u32>,
    pub domain: String,
    pub fields: FieldLayout,
    pub store_root: PathBuf,
    pub overlay_dir: Option<PathBuf>,
    pub write_columnar: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            dx_km: 3.0,
            max_centroid_dist_km: 40.0,
            max_boundary_dist_km: 40.0,
            area_thresh: 12,
            truth_thresholds: IntensityThresholds::default(),
            forecast_thresholds: IntensityThresholds::default(),
            ti_thresh: 0.2,
            area_ratio_weighting: false,
            max_match_iterations: 5,
            time_step_seconds: 300,
            forecast_length_minutes: 180,
            members: (1..=18).collect(),
            domain: "wofs".to_string(),
            fields: FieldLayout::default(),
            store_root: PathBuf::from("verification"),
            overlay_dir: None,
            write_columnar: false,
        }
    }
}

impl VerificationConfig {
    /// Reads and validates a JSON configuration file.
    pub fn from_json_file(path: &Path) -> VerifyResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            VerifyError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VerifyResult<()> {
        if !(self.dx_km > 0.0) {
            return Err(VerifyError::InvalidConfig(format!(
                "dx_km must be positive, got {}",
                self.dx_km
            )));
        }
        if !(self.max_centroid_dist_km > 0.0) || !(self.max_boundary_dist_km > 0.0) {
            return Err(VerifyError::InvalidConfig(
                "displacement limits must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.ti_thresh) {
            return Err(VerifyError::InvalidConfig(format!(
                "ti_thresh must lie in [0, 1), got {}",
                self.ti_thresh
            )));
        }
        if self.time_step_seconds <= 0 {
            return Err(VerifyError::InvalidConfig(
                "time_step_seconds must be positive".to_string(),
            ));
        }
        if self.max_match_iterations == 0 {
            return Err(VerifyError::InvalidConfig(
                "max_match_iterations must be at least 1".to_string(),
            ));
        }
        if self.members.is_empty() {
            return Err(VerifyError::InvalidConfig("no ensemble members".to_string()));
        }
        Ok(())
    }

    /// Maximum centroid displacement in grid cells.
    pub fn max_centroid_disp(&self) -> f64 {
        self.max_centroid_dist_km / self.dx_km
    }

    /// Maximum boundary displacement in grid cells.
    pub fn max_bound_disp(&self) -> f64 {
        self.max_boundary_dist_km / self.dx_km
    }

    /// Valid-time offsets from initialization, in seconds, including lead 0.
    ///
    /// Spaced by exactly `time_step_seconds`, the same increment the tracker adds
    /// to age, so age stays equal to elapsed time since first detection.
    pub fn lead_times_seconds(&self) -> Vec<i64> {
        let step = self.time_step_seconds.max(1);
        (0..=self.forecast_length_minutes.max(0) * 60 / step)
            .map(|i| i * step)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = VerificationConfig::default();
        config.validate().expect("defaults must be valid");
        assert!((config.max_centroid_disp() - 40.0 / 3.0).abs() < 1e-12);
        assert_eq!(config.max_match_iterations, 5);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: VerificationConfig =
            serde_json::from_str(r#"{ "ti_thresh": 0.3, "members": [1, 2] }"#).unwrap();
        assert_eq!(config.ti_thresh, 0.3);
        assert_eq!(config.members, vec![1, 2]);
        assert_eq!(config.dx_km, 3.0);
        assert_eq!(config.truth_thresholds, IntensityThresholds::default());
    }

    #[test]
    fn rejects_bad_threshold() {
        let config = VerificationConfig {
            ti_thresh: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(VerifyError::InvalidConfig(_))));
    }

    #[test]
    fn lead_times_follow_step() {
        let config = VerificationConfig {
            forecast_length_minutes: 15,
            ..Default::default()
        };
        assert_eq!(config.lead_times_seconds(), vec![0, 300, 600, 900]);
    }

    #[test]
    fn sub_minute_step_keeps_exact_spacing() {
        let config = VerificationConfig {
            time_step_seconds: 90,
            forecast_length_minutes: 3,
            ..Default::default()
        };
        let leads = config.lead_times_seconds();
        assert_eq!(leads, vec![0, 90, 180]);
        assert!(leads.windows(2).all(|w| w[1] - w[0] == config.time_step_seconds));
    }
}
