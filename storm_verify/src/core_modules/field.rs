// THEORY:
// Fields are the raw material of verification: one 2-D grid of intensity values
// (composite reflectivity, typically) per source and valid time. The engine does
// not care where a grid comes from, only whether it exists and whether anything
// in it reaches the detection floor. Those three outcomes are captured by
// `FieldStatus`, and every loader funnels into them through `classify_field`.

use crate::core_modules::config::FieldLayout;
use crate::core_modules::error::{VerifyError, VerifyResult};
use chrono::{DateTime, NaiveDate, Utc};
use image::error::{ParameterError, ParameterErrorKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A row-major 2-D grid of intensities.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub rows: usize,
    pub cols: usize,
    data: Vec<f64>,
}

impl Field {
    /// Returns `None` when `data` does not hold `rows * cols` values.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Option<Self> {
        (data.len() == rows * cols).then_some(Self { rows, cols, data })
    }

    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    /// Largest finite value, or `None` for an empty or all-NaN grid.
    pub fn max(&self) -> Option<f64> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| Some(acc.map_or(v, |m: f64| m.max(v))))
    }
}

/// What was found for one source at one valid time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    /// The field exists and something reaches the detection floor.
    Present,
    /// The field file is absent.
    Missing,
    /// The field exists but is entirely below the detection floor.
    Zero,
}

/// Reduces a load result to a field (when usable) and its status.
///
/// Missing and degenerate fields are recovered here; any other error is passed
/// through for the caller to abort the cycle.
pub fn classify_field(
    loaded: VerifyResult<Field>,
    detection_floor: f64,
) -> VerifyResult<(Option<Field>, FieldStatus)> {
    let checked = loaded.and_then(|field| match field.max() {
        Some(max) if max >= detection_floor => Ok(field),
        max_value => Err(VerifyError::DegenerateField {
            max_value,
            floor: detection_floor,
        }),
    });

    match checked {
        Ok(field) => Ok((Some(field), FieldStatus::Present)),
        Err(e) if e.is_recoverable() => {
            debug!(error = %e, "field contributes no objects");
            let status = match e {
                VerifyError::MissingInput(_) => FieldStatus::Missing,
                _ => FieldStatus::Zero,
            };
            Ok((None, status))
        }
        Err(e) => Err(e),
    }
}

/// Wraps decoded raster values, rejecting a buffer that disagrees with the
/// raster dimensions as an undecodable field.
fn field_from_raster(path: &Path, width: u32, height: u32, data: Vec<f64>) -> VerifyResult<Field> {
    Field::new(height as usize, width as usize, data).ok_or_else(|| VerifyError::UnreadableField {
        path: path.to_path_buf(),
        source: image::ImageError::Parameter(ParameterError::from_kind(
            ParameterErrorKind::DimensionMismatch,
        )),
    })
}

/// Supplies the truth and forecast grids for a forecast cycle.
///
/// Implementations return `VerifyError::MissingInput` for an absent field.
pub trait FieldSource: Send + Sync {
    fn truth_field(&self, case_date: NaiveDate, valid_time: DateTime<Utc>) -> VerifyResult<Field>;

    fn forecast_field(
        &self,
        case_date: NaiveDate,
        member: u32,
        init_time: DateTime<Utc>,
        valid_time: DateTime<Utc>,
    ) -> VerifyResult<Field>;
}

const TIME_TOKEN_FORMAT: &str = "%Y%m%d%H%M";

/// Reads 16-bit grayscale rasters laid out according to a [`FieldLayout`].
#[derive(Debug, Clone)]
pub struct RasterFieldSource {
    root: PathBuf,
    layout: FieldLayout,
}

impl RasterFieldSource {
    pub fn new(root: impl Into<PathBuf>, layout: FieldLayout) -> Self {
        Self {
            root: root.into(),
            layout,
        }
    }

    fn expand(
        &self,
        template: &str,
        case_date: NaiveDate,
        member: Option<u32>,
        init_time: Option<DateTime<Utc>>,
        valid_time: DateTime<Utc>,
    ) -> PathBuf {
        let mut path = template
            .replace("{date}", &case_date.format("%Y%m%d").to_string())
            .replace("{valid}", &valid_time.format(TIME_TOKEN_FORMAT).to_string());
        if let Some(init) = init_time {
            path = path.replace("{init}", &init.format(TIME_TOKEN_FORMAT).to_string());
        }
        if let Some(member) = member {
            path = path.replace("{member}", &format!("{member:02}"));
        }
        self.root.join(path)
    }

    fn load(&self, path: &Path) -> VerifyResult<Field> {
        if !path.exists() {
            return Err(VerifyError::MissingInput(path.to_path_buf()));
        }
        let image = image::open(path).map_err(|source| VerifyError::UnreadableField {
            path: path.to_path_buf(),
            source,
        })?;
        let gray = image.to_luma16();
        let (width, height) = gray.dimensions();
        let data = gray
            .pixels()
            .map(|p| p.0[0] as f64 * self.layout.scale + self.layout.offset)
            .collect();
        field_from_raster(path, width, height, data)
    }
}

impl FieldSource for RasterFieldSource {
    fn truth_field(&self, case_date: NaiveDate, valid_time: DateTime<Utc>) -> VerifyResult<Field> {
        let path = self.expand(&self.layout.truth_template, case_date, None, None, valid_time);
        self.load(&path)
    }

    fn forecast_field(
        &self,
        case_date: NaiveDate,
        member: u32,
        init_time: DateTime<Utc>,
        valid_time: DateTime<Utc>,
    ) -> VerifyResult<Field> {
        let path = self.expand(
            &self.layout.forecast_template,
            case_date,
            Some(member),
            Some(init_time),
            valid_time,
        );
        self.load(&path)
    }
}
