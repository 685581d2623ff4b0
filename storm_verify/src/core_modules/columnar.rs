// Column-per-attribute mirror of a cycle record. Every column of a table is an
// f64 vector whose length equals the number of records in that collection.

use crate::core_modules::outcome::{ObjectAttributes, Outcome, OutcomeRecord};
use crate::core_modules::store::CycleRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnarTable {
    pub rows: usize,
    pub columns: BTreeMap<String, Vec<f64>>,
}

impl ColumnarTable {
    fn push(&mut self, name: &str, value: f64) {
        self.columns.entry(name.to_string()).or_default().push(value);
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    fn from_records(records: &[OutcomeRecord]) -> Self {
        let mut table = Self {
            rows: records.len(),
            columns: BTreeMap::new(),
        };
        for record in records {
            table.push_record(record);
        }
        table
    }

    fn push_record(&mut self, record: &OutcomeRecord) {
        let ctx = &record.context;
        self.push("init_time", ctx.init_time.timestamp() as f64);
        self.push("valid_time", ctx.valid_time.timestamp() as f64);
        self.push("lead_time_minutes", ctx.lead_time_minutes as f64);
        self.push("member", ctx.member as f64);

        match &record.outcome {
            Outcome::Hit {
                forecast,
                truth,
                comparison,
            } => {
                self.push_attributes("fcst", forecast);
                self.push_attributes("obs", truth);
                self.push("total_interest", comparison.total_interest);
                self.push("centroid_interest", comparison.centroid_interest);
                self.push("boundary_interest", comparison.boundary_interest);
                self.push("centroid_displacement_km", comparison.centroid_displacement_km);
                self.push("boundary_displacement_km", comparison.boundary_displacement_km);
                self.push("area_ratio", comparison.area_ratio);
            }
            Outcome::FalseAlarm { forecast } => self.push_attributes("fcst", forecast),
            Outcome::Extra {
                forecast,
                best_truth_id,
                total_interest,
            } => {
                self.push_attributes("fcst", forecast);
                self.push("best_obs_id", *best_truth_id as f64);
                self.push("total_interest", *total_interest);
            }
            Outcome::Miss { truth } => self.push_attributes("obs", truth),
            Outcome::TruthExtra {
                truth,
                best_forecast_id,
                total_interest,
            } => {
                self.push_attributes("obs", truth);
                self.push("best_fcst_id", *best_forecast_id as f64);
                self.push("total_interest", *total_interest);
            }
        }
    }

    fn push_attributes(&mut self, prefix: &str, attrs: &ObjectAttributes) {
        let fields = [
            ("id", attrs.id as f64),
            ("area", attrs.area as f64),
            ("centroid_row", attrs.centroid_row),
            ("centroid_col", attrs.centroid_col),
            ("max_intensity", attrs.max_intensity),
            ("mean_intensity", attrs.mean_intensity),
            ("major_axis_length", attrs.major_axis_length),
            ("minor_axis_length", attrs.minor_axis_length),
            ("eccentricity", attrs.eccentricity),
            ("orientation", attrs.orientation),
            ("solidity", attrs.solidity),
        ];
        for (name, value) in fields {
            self.push(&format!("{prefix}_{name}"), value);
        }
        if let Some(age) = attrs.age {
            self.push(&format!("{prefix}_age"), age as f64);
        }
    }
}

/// The five collections of a record, one table each.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnarExport {
    #[serde(rename = "Hits")]
    pub hits: ColumnarTable,
    #[serde(rename = "Extras")]
    pub extras: ColumnarTable,
    #[serde(rename = "FAs")]
    pub false_alarms: ColumnarTable,
    #[serde(rename = "Misses")]
    pub misses: ColumnarTable,
    #[serde(rename = "MRMS_Extras")]
    pub truth_extras: ColumnarTable,
}

impl ColumnarExport {
    pub fn from_record(record: &CycleRecord) -> Self {
        let o = &record.outcomes;
        Self {
            hits: ColumnarTable::from_records(&o.hits),
            extras: ColumnarTable::from_records(&o.extras),
            false_alarms: ColumnarTable::from_records(&o.false_alarms),
            misses: ColumnarTable::from_records(&o.misses),
            truth_extras: ColumnarTable::from_records(&o.truth_extras),
        }
    }
}
