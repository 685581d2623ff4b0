// THEORY:
// Outcomes are what verification ultimately produces: one record per object per
// (member, valid time), tagged with how that object fared in matching. Each
// variant carries only the fields that make sense for it, so a false alarm has
// no truth attributes and a hit always has both sides.
//
// `CycleOutcomes` is the aggregator for one forecast cycle. It is an explicit
// value that the cycle pipeline owns and returns; nothing here is global.

use crate::core_modules::interest::InterestScore;
use crate::core_modules::matcher::{ForecastOutcome, MatchResult, TruthOutcome};
use crate::core_modules::storm_object::StormObject;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Flat attribute snapshot of a storm object, as stored in outcome records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectAttributes {
    pub id: u32,
    pub area: usize,
    pub centroid_row: f64,
    pub centroid_col: f64,
    pub max_intensity: f64,
    pub mean_intensity: f64,
    pub major_axis_length: f64,
    pub minor_axis_length: f64,
    pub eccentricity: f64,
    pub orientation: f64,
    pub solidity: f64,
    /// Seconds since first detection; `None` for forecast objects.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub age: Option<i64>,
}

impl ObjectAttributes {
    pub fn forecast(obj: &StormObject) -> Self {
        Self::build(obj, None)
    }

    pub fn truth(obj: &StormObject) -> Self {
        Self::build(obj, Some(obj.age))
    }

    fn build(obj: &StormObject, age: Option<i64>) -> Self {
        Self {
            id: obj.id,
            area: obj.area,
            centroid_row: obj.centroid.0,
            centroid_col: obj.centroid.1,
            max_intensity: obj.stats.max_intensity,
            mean_intensity: obj.stats.mean_intensity,
            major_axis_length: obj.stats.major_axis_length,
            minor_axis_length: obj.stats.minor_axis_length,
            eccentricity: obj.stats.eccentricity,
            orientation: obj.stats.orientation,
            solidity: obj.stats.solidity,
            age,
        }
    }
}

/// When and for whom a record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeContext {
    pub init_time: DateTime<Utc>,
    pub valid_time: DateTime<Utc>,
    pub lead_time_minutes: i64,
    pub member: u32,
}

impl OutcomeContext {
    pub fn new(init_time: DateTime<Utc>, valid_time: DateTime<Utc>, member: u32) -> Self {
        Self {
            init_time,
            valid_time,
            lead_time_minutes: (valid_time - init_time).num_minutes(),
            member,
        }
    }
}

/// Attribute comparison of a matched pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairComparison {
    pub total_interest: f64,
    pub centroid_interest: f64,
    pub boundary_interest: f64,
    /// Centroid displacement in kilometres.
    pub centroid_displacement_km: f64,
    /// Minimum boundary separation in kilometres.
    pub boundary_displacement_km: f64,
    pub area_ratio: f64,
}

impl PairComparison {
    pub fn from_score(score: &InterestScore, dx_km: f64) -> Self {
        Self {
            total_interest: score.total_interest,
            centroid_interest: score.centroid_interest,
            boundary_interest: score.boundary_interest,
            centroid_displacement_km: score.centroid_distance * dx_km,
            boundary_displacement_km: score.boundary_distance * dx_km,
            area_ratio: score.area_ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Hit {
        forecast: ObjectAttributes,
        truth: ObjectAttributes,
        comparison: PairComparison,
    },
    FalseAlarm {
        forecast: ObjectAttributes,
    },
    Extra {
        forecast: ObjectAttributes,
        best_truth_id: u32,
        total_interest: f64,
    },
    Miss {
        truth: ObjectAttributes,
    },
    TruthExtra {
        truth: ObjectAttributes,
        best_forecast_id: u32,
        total_interest: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    #[serde(flatten)]
    pub context: OutcomeContext,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// The five outcome collections of one forecast cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleOutcomes {
    #[serde(rename = "Hits")]
    pub hits: Vec<OutcomeRecord>,
    #[serde(rename = "Extras")]
    pub extras: Vec<OutcomeRecord>,
    #[serde(rename = "FAs")]
    pub false_alarms: Vec<OutcomeRecord>,
    #[serde(rename = "Misses")]
    pub misses: Vec<OutcomeRecord>,
    #[serde(rename = "MRMS_Extras")]
    pub truth_extras: Vec<OutcomeRecord>,
}

impl CycleOutcomes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files a record under the collection its variant belongs to.
    pub fn push(&mut self, record: OutcomeRecord) {
        let bucket = match record.outcome {
            Outcome::Hit { .. } => &mut self.hits,
            Outcome::FalseAlarm { .. } => &mut self.false_alarms,
            Outcome::Extra { .. } => &mut self.extras,
            Outcome::Miss { .. } => &mut self.misses,
            Outcome::TruthExtra { .. } => &mut self.truth_extras,
        };
        bucket.push(record);
    }

    /// Converts one match result into records and files them.
    pub fn record_match(
        &mut self,
        context: OutcomeContext,
        truth: &[StormObject],
        forecast: &[StormObject],
        result: &MatchResult,
        dx_km: f64,
    ) {
        for pair in &result.pairs {
            self.push(OutcomeRecord {
                context,
                outcome: Outcome::Hit {
                    forecast: ObjectAttributes::forecast(&forecast[pair.forecast]),
                    truth: ObjectAttributes::truth(&truth[pair.truth]),
                    comparison: PairComparison::from_score(&pair.score, dx_km),
                },
            });
        }

        for (obj, outcome) in forecast.iter().zip(&result.forecast) {
            let outcome = match *outcome {
                ForecastOutcome::Hit { .. } => continue,
                ForecastOutcome::Extra(best) => Outcome::Extra {
                    forecast: ObjectAttributes::forecast(obj),
                    best_truth_id: truth[best.index].id,
                    total_interest: best.total_interest,
                },
                ForecastOutcome::FalseAlarm => Outcome::FalseAlarm {
                    forecast: ObjectAttributes::forecast(obj),
                },
            };
            self.push(OutcomeRecord { context, outcome });
        }

        for (obj, outcome) in truth.iter().zip(&result.truth) {
            let outcome = match *outcome {
                TruthOutcome::Hit { .. } => continue,
                TruthOutcome::TruthExtra(best) => Outcome::TruthExtra {
                    truth: ObjectAttributes::truth(obj),
                    best_forecast_id: forecast[best.index].id,
                    total_interest: best.total_interest,
                },
                TruthOutcome::Miss => Outcome::Miss {
                    truth: ObjectAttributes::truth(obj),
                },
            };
            self.push(OutcomeRecord { context, outcome });
        }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
            + self.extras.len()
            + self.false_alarms.len()
            + self.misses.len()
            + self.truth_extras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> ContingencySummary {
        ContingencySummary::from_counts(
            self.hits.len(),
            self.misses.len() + self.truth_extras.len(),
            self.false_alarms.len() + self.extras.len(),
        )
    }
}

/// Object-level contingency counts and the scores derived from them.
///
/// Extras count as false alarms and truth extras as misses: neither was matched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContingencySummary {
    pub hits: usize,
    pub misses: usize,
    pub false_alarms: usize,
    pub pod: Option<f64>,
    pub far: Option<f64>,
    pub bias: Option<f64>,
    pub csi: Option<f64>,
}

impl ContingencySummary {
    pub fn from_counts(hits: usize, misses: usize, false_alarms: usize) -> Self {
        let ratio = |num: usize, den: usize| (den > 0).then(|| num as f64 / den as f64);
        Self {
            hits,
            misses,
            false_alarms,
            pod: ratio(hits, hits + misses),
            far: ratio(false_alarms, hits + false_alarms),
            bias: ratio(hits + false_alarms, hits + misses),
            csi: ratio(hits, hits + misses + false_alarms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::interest::InterestParams;
    use crate::core_modules::matcher::{MatchParams, match_objects};
    use crate::core_modules::storm_object::test_shapes::centered;
    use chrono::TimeZone;

    fn context() -> OutcomeContext {
        let init = Utc.with_ymd_and_hms(2021, 5, 14, 20, 0, 0).unwrap();
        OutcomeContext::new(init, init + chrono::Duration::minutes(30), 4)
    }

    fn params() -> MatchParams {
        MatchParams {
            interest: InterestParams::new(40.0 / 3.0, 40.0 / 3.0),
            ti_thresh: 0.2,
            max_iterations: 5,
        }
    }

    #[test]
    fn lead_time_in_minutes() {
        assert_eq!(context().lead_time_minutes, 30);
    }

    #[test]
    fn records_cover_every_object_once() {
        let truth = vec![centered(1, 10, 10, 3).with_age(600), centered(2, 60, 60, 3)];
        let forecast = vec![
            centered(1, 10, 11, 3),
            centered(2, 10, 14, 3),
            centered(3, 120, 10, 3),
        ];
        let result = match_objects(&truth, &forecast, &params());

        let mut outcomes = CycleOutcomes::new();
        outcomes.record_match(context(), &truth, &forecast, &result, 3.0);

        assert_eq!(outcomes.hits.len(), 1);
        assert_eq!(outcomes.extras.len(), 1);
        assert_eq!(outcomes.false_alarms.len(), 1);
        assert_eq!(outcomes.misses.len(), 1);
        assert_eq!(outcomes.truth_extras.len(), 0);
        assert_eq!(
            outcomes.hits.len() + outcomes.false_alarms.len() + outcomes.extras.len(),
            forecast.len()
        );
        assert_eq!(
            outcomes.hits.len() + outcomes.misses.len() + outcomes.truth_extras.len(),
            truth.len()
        );

        match &outcomes.hits[0].outcome {
            Outcome::Hit { truth, comparison, .. } => {
                assert_eq!(truth.age, Some(600));
                assert!((comparison.centroid_displacement_km - 3.0).abs() < 1e-9);
            }
            other => panic!("expected hit, got {other:?}"),
        }
        match &outcomes.extras[0].outcome {
            Outcome::Extra { best_truth_id, .. } => assert_eq!(*best_truth_id, 1),
            other => panic!("expected extra, got {other:?}"),
        }
    }

    #[test]
    fn contested_forecast_leaves_truth_extra() {
        // Ids deliberately differ from positions in the input slices.
        let truth = vec![centered(5, 10, 10, 3).with_age(900), centered(9, 10, 13, 3)];
        let forecast = vec![centered(2, 200, 200, 3), centered(7, 10, 10, 3)];
        let result = match_objects(&truth, &forecast, &params());
        assert_eq!(result.hit_count(), 1);

        let mut outcomes = CycleOutcomes::new();
        outcomes.record_match(context(), &truth, &forecast, &result, 3.0);

        assert_eq!(outcomes.hits.len(), 1);
        assert_eq!(outcomes.false_alarms.len(), 1);
        assert!(outcomes.misses.is_empty());
        assert_eq!(outcomes.truth_extras.len(), 1);
        match &outcomes.truth_extras[0].outcome {
            Outcome::TruthExtra {
                truth,
                best_forecast_id,
                total_interest,
            } => {
                assert_eq!(truth.id, 9);
                assert_eq!(*best_forecast_id, 7);
                assert!(*total_interest > 0.2 && *total_interest < 1.0);
            }
            other => panic!("expected truth extra, got {other:?}"),
        }

        let value = serde_json::to_value(&outcomes).unwrap();
        assert_eq!(value["MRMS_Extras"].as_array().unwrap().len(), 1);
        assert_eq!(value["MRMS_Extras"][0]["outcome"], "truth_extra");
        assert_eq!(value["MRMS_Extras"][0]["best_forecast_id"], 7);
    }

    #[test]
    fn record_serializes_flat_context() {
        let record = OutcomeRecord {
            context: context(),
            outcome: Outcome::FalseAlarm {
                forecast: ObjectAttributes::forecast(&centered(7, 5, 5, 1)),
            },
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["outcome"], "false_alarm");
        assert_eq!(value["member"], 4);
        assert_eq!(value["lead_time_minutes"], 30);
        assert!(value["forecast"].get("age").is_none());
    }

    #[test]
    fn collections_use_legacy_names() {
        let value = serde_json::to_value(CycleOutcomes::new()).unwrap();
        for key in ["Hits", "Extras", "FAs", "Misses", "MRMS_Extras"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn contingency_scores() {
        let s = ContingencySummary::from_counts(6, 2, 2);
        assert_eq!(s.pod, Some(0.75));
        assert_eq!(s.far, Some(0.25));
        assert_eq!(s.bias, Some(1.0));
        assert_eq!(s.csi, Some(0.6));
        assert_eq!(ContingencySummary::from_counts(0, 0, 0).pod, None);
    }
}
