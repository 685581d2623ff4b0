// THEORY:
// The `pipeline` module is the top-level API for verifying one forecast cycle.
// It strings the engine's layers together in the only order that makes sense:
//
//   truth fields  -> region extractor -> truth tracker (ages, missing/zero marks)
//   forecast fields -> region extractor --+
//                                         +-> matcher -> outcome aggregator -> store
//   tracked truth objects ----------------+
//
// A cycle runs sequentially and single-threaded. The truth stream is processed
// first, in increasing valid-time order, because age at time T depends on T - 1.
// Absent or quiet fields degrade to "no objects" and are logged; a field that
// exists but cannot be read aborts the cycle before anything is written, so a
// stored record is always complete. Companion outputs are written before the
// record, which is the cycle's commit marker.

use crate::core_modules::columnar::ColumnarExport;
use crate::core_modules::config::VerificationConfig;
use crate::core_modules::error::VerifyResult;
use crate::core_modules::field::{FieldStatus, FieldSource, classify_field};
use crate::core_modules::interest::InterestParams;
use crate::core_modules::matcher::{MatchParams, match_objects};
use crate::core_modules::outcome::{ContingencySummary, CycleOutcomes, OutcomeContext};
use crate::core_modules::region_extractor::{ExtractionThresholds, RegionExtractor};
use crate::core_modules::storm_object::StormObject;
use crate::core_modules::store::{CycleKey, CycleRecord, OutcomeStore, RunMetadata, TimelineStep};
use crate::core_modules::tracker::TruthTracker;
use crate::utils::image_helper::image_helper;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// One forecast cycle: which initialization, which members, which valid times.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSpec {
    pub key: CycleKey,
    pub members: Vec<u32>,
    /// Increasing valid times, starting at the initialization time.
    pub valid_times: Vec<DateTime<Utc>>,
}

impl CycleSpec {
    pub fn from_config(case_date: NaiveDate, init_time: DateTime<Utc>, config: &VerificationConfig) -> Self {
        let valid_times = config
            .lead_times_seconds()
            .into_iter()
            .map(|lead| init_time + Duration::seconds(lead))
            .collect();
        Self {
            key: CycleKey::new(case_date, init_time, config.domain.clone()),
            members: config.members.clone(),
            valid_times,
        }
    }
}

/// What happened to a cycle that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleReport {
    Completed {
        key: CycleKey,
        path: PathBuf,
        summary: ContingencySummary,
    },
    /// No truth objects anywhere in the cycle; nothing was written.
    Skipped { key: CycleKey },
}

/// The verification engine for a single run configuration.
pub struct VerificationPipeline {
    config: VerificationConfig,
    extractor: Box<dyn RegionExtractor>,
    source: Box<dyn FieldSource>,
    store: Box<dyn OutcomeStore>,
}

impl VerificationPipeline {
    pub fn new(
        config: VerificationConfig,
        extractor: Box<dyn RegionExtractor>,
        source: Box<dyn FieldSource>,
        store: Box<dyn OutcomeStore>,
    ) -> Self {
        Self {
            config,
            extractor,
            source,
            store,
        }
    }

    fn match_params(&self) -> MatchParams {
        MatchParams {
            interest: InterestParams::new(self.config.max_centroid_disp(), self.config.max_bound_disp())
                .with_area_ratio(self.config.area_ratio_weighting),
            ti_thresh: self.config.ti_thresh,
            max_iterations: self.config.max_match_iterations,
        }
    }

    fn truth_thresholds(&self) -> ExtractionThresholds {
        ExtractionThresholds {
            area_thresh: self.config.area_thresh,
            intensity: self.config.truth_thresholds,
        }
    }

    fn forecast_thresholds(&self) -> ExtractionThresholds {
        ExtractionThresholds {
            area_thresh: self.config.area_thresh,
            intensity: self.config.forecast_thresholds,
        }
    }

    /// Extracts and ages the truth objects of every valid time in the cycle.
    pub fn track_truth(&self, cycle: &CycleSpec) -> VerifyResult<TruthTracker> {
        let thresholds = self.truth_thresholds();
        let mut tracker = TruthTracker::new(self.config.time_step_seconds);

        for &valid_time in &cycle.valid_times {
            let loaded = self.source.truth_field(cycle.key.case_date, valid_time);
            let (field, status) = classify_field(loaded, thresholds.intensity.detection_floor)?;
            let objects = field
                .map(|f| self.extractor.extract(&f, &thresholds))
                .unwrap_or_default();
            tracker.observe(valid_time, status, objects)?;
        }

        Ok(tracker)
    }

    /// Runs tracking and matching for a cycle without writing anything.
    ///
    /// Returns `None` when the cycle holds no truth objects at all.
    pub fn build_record(&self, cycle: &CycleSpec) -> VerifyResult<Option<CycleRecord>> {
        let tracker = self.track_truth(cycle)?;
        if tracker.total_objects() == 0 {
            warn!(cycle = %cycle.key, "no truth objects in cycle; skipping");
            return Ok(None);
        }

        let params = self.match_params();
        let thresholds = self.forecast_thresholds();
        let init_time = cycle.key.init_time;
        let mut outcomes = CycleOutcomes::new();

        for &member in &cycle.members {
            for step in tracker.steps() {
                if step.status == FieldStatus::Missing {
                    continue;
                }
                let valid_time = step.valid_time;
                let loaded = self
                    .source
                    .forecast_field(cycle.key.case_date, member, init_time, valid_time);
                let (field, status) = classify_field(loaded, thresholds.intensity.detection_floor)?;
                if status == FieldStatus::Missing {
                    warn!(cycle = %cycle.key, member, %valid_time, "forecast field missing");
                    continue;
                }

                let forecast: Vec<StormObject> = field
                    .as_ref()
                    .map(|f| self.extractor.extract(f, &thresholds))
                    .unwrap_or_default();
                let result = match_objects(&step.objects, &forecast, &params);
                if result.exhausted {
                    warn!(cycle = %cycle.key, member, %valid_time, "contested matches left unresolved");
                }
                debug!(
                    cycle = %cycle.key,
                    member,
                    %valid_time,
                    hits = result.hit_count(),
                    iterations = result.iterations,
                    "member matched"
                );

                outcomes.record_match(
                    OutcomeContext::new(init_time, valid_time, member),
                    &step.objects,
                    &forecast,
                    &result,
                    self.config.dx_km,
                );

                if let (Some(dir), Some(f)) = (&self.config.overlay_dir, &field) {
                    let path = dir
                        .join(cycle.key.relative_stem())
                        .join(format!("mem{member:02}_{}.png", valid_time.format("%Y%m%d%H%M")));
                    let buffer =
                        image_helper::render_match_overlay(f.rows, f.cols, &step.objects, &forecast, &result);
                    if let Err(e) = image_helper::save(&path, f.cols as u32, f.rows as u32, &buffer) {
                        warn!(path = %path.display(), error = %e, "could not write overlay");
                    }
                }
            }
        }

        let summary = outcomes.summary();
        Ok(Some(CycleRecord {
            key: cycle.key.clone(),
            metadata: RunMetadata::from_config(&self.config),
            outcomes,
            missing_times: tracker.times_with_status(FieldStatus::Missing),
            zero_times: tracker.times_with_status(FieldStatus::Zero),
            summary,
            truth_timeline: tracker.steps().iter().map(TimelineStep::from).collect(),
        }))
    }

    /// Verifies a cycle and persists its record.
    pub fn process_cycle(&self, cycle: &CycleSpec) -> VerifyResult<CycleReport> {
        let Some(record) = self.build_record(cycle)? else {
            return Ok(CycleReport::Skipped {
                key: cycle.key.clone(),
            });
        };

        if self.config.write_columnar {
            self.store
                .write_columns(&record.key, &ColumnarExport::from_record(&record))?;
        }
        let path = self.store.write(&record)?;

        info!(
            cycle = %record.key,
            hits = record.summary.hits,
            misses = record.summary.misses,
            false_alarms = record.summary.false_alarms,
            csi = ?record.summary.csi,
            "cycle verified"
        );
        Ok(CycleReport::Completed {
            key: record.key,
            path,
            summary: record.summary,
        })
    }
}
