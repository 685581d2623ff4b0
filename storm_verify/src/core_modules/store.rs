// THEORY:
// Each forecast cycle owns exactly one record in the store, keyed by case date,
// initialization time and domain. Because no two cycles share a key, concurrent
// workers never contend for the same file, and the store needs no locking.
//
// Writes are all-or-nothing: the record is serialized in full, written to a
// temporary sibling and renamed into place, so a reader either sees the previous
// record or the complete new one. The record is the commit marker of a cycle:
// companion files are written before it, and a cycle only counts as stored once
// its record exists.

use crate::core_modules::columnar::ColumnarExport;
use crate::core_modules::config::{IntensityThresholds, VerificationConfig};
use crate::core_modules::error::{VerifyError, VerifyResult};
use crate::core_modules::field::FieldStatus;
use crate::core_modules::outcome::{ContingencySummary, CycleOutcomes, ObjectAttributes};
use crate::core_modules::tracker::TruthStep;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Identifies one forecast cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CycleKey {
    pub case_date: NaiveDate,
    pub init_time: DateTime<Utc>,
    pub domain: String,
}

impl CycleKey {
    pub fn new(case_date: NaiveDate, init_time: DateTime<Utc>, domain: impl Into<String>) -> Self {
        Self {
            case_date,
            init_time,
            domain: domain.into(),
        }
    }

    /// Relative path of the record, e.g. `20210514/2000_wofs`.
    pub fn relative_stem(&self) -> PathBuf {
        PathBuf::from(self.case_date.format("%Y%m%d").to_string())
            .join(format!("{}_{}", self.init_time.format("%H%M"), self.domain))
    }
}

impl std::fmt::Display for CycleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.case_date.format("%Y%m%d"),
            self.init_time.format("%H%M"),
            self.domain
        )
    }
}

/// Threshold parameters the record was produced with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub area_thresh: usize,
    pub max_centroid_disp: f64,
    pub max_bound_disp: f64,
    pub ti_thresh: f64,
    pub dx_km: f64,
    pub truth_thresholds: IntensityThresholds,
    pub forecast_thresholds: IntensityThresholds,
    pub area_ratio_weighting: bool,
}

impl RunMetadata {
    pub fn from_config(config: &VerificationConfig) -> Self {
        Self {
            area_thresh: config.area_thresh,
            max_centroid_disp: config.max_centroid_disp(),
            max_bound_disp: config.max_bound_disp(),
            ti_thresh: config.ti_thresh,
            dx_km: config.dx_km,
            truth_thresholds: config.truth_thresholds,
            forecast_thresholds: config.forecast_thresholds,
            area_ratio_weighting: config.area_ratio_weighting,
        }
    }
}

/// The truth objects observed at one valid time, with their ages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineStep {
    pub valid_time: DateTime<Utc>,
    pub status: FieldStatus,
    pub objects: Vec<ObjectAttributes>,
}

impl From<&TruthStep> for TimelineStep {
    fn from(step: &TruthStep) -> Self {
        Self {
            valid_time: step.valid_time,
            status: step.status,
            objects: step.objects.iter().map(ObjectAttributes::truth).collect(),
        }
    }
}

/// The persisted result of one forecast cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub key: CycleKey,
    pub metadata: RunMetadata,
    #[serde(flatten)]
    pub outcomes: CycleOutcomes,
    /// Valid times whose truth field was absent.
    pub missing_times: Vec<DateTime<Utc>>,
    /// Valid times whose truth field held nothing above the detection floor.
    pub zero_times: Vec<DateTime<Utc>>,
    pub summary: ContingencySummary,
    /// Every truth valid time of the cycle in order, including missing and zero ones.
    pub truth_timeline: Vec<TimelineStep>,
}

pub trait OutcomeStore: Send + Sync {
    /// Persists `record` under its key and returns where it went.
    fn write(&self, record: &CycleRecord) -> VerifyResult<PathBuf>;

    /// Persists the columnar mirror of a record next to it.
    fn write_columns(&self, key: &CycleKey, columns: &ColumnarExport) -> VerifyResult<PathBuf>;

    fn read(&self, key: &CycleKey) -> VerifyResult<CycleRecord>;

    fn contains(&self, key: &CycleKey) -> bool;
}

/// One JSON document per cycle under a root directory.
#[derive(Debug, Clone)]
pub struct JsonDirectoryStore {
    root: PathBuf,
}

impl JsonDirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn record_path(&self, key: &CycleKey) -> PathBuf {
        self.root.join(key.relative_stem()).with_extension("json")
    }

    /// Path of a companion file next to the record, e.g. `columns.json`.
    pub fn companion_path(&self, key: &CycleKey, suffix: &str) -> PathBuf {
        self.root.join(key.relative_stem()).with_extension(suffix)
    }

    /// Serializes `value` and atomically places it at `path`.
    pub fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> VerifyResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let dir = path
            .parent()
            .ok_or_else(|| VerifyError::persistence(path, std::io::ErrorKind::InvalidInput.into()))?;
        fs::create_dir_all(dir).map_err(|e| VerifyError::persistence(dir, e))?;

        let tmp = path.with_extension("tmp");
        let result = fs::File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(&bytes)?;
                file.sync_all()
            })
            .and_then(|_| fs::rename(&tmp, path));

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(VerifyError::persistence(path, e));
        }
        Ok(())
    }
}

impl OutcomeStore for JsonDirectoryStore {
    fn write(&self, record: &CycleRecord) -> VerifyResult<PathBuf> {
        let path = self.record_path(&record.key);
        self.write_atomic(&path, record)?;
        Ok(path)
    }

    fn write_columns(&self, key: &CycleKey, columns: &ColumnarExport) -> VerifyResult<PathBuf> {
        let path = self.companion_path(key, "columns.json");
        self.write_atomic(&path, columns)?;
        Ok(path)
    }

    fn read(&self, key: &CycleKey) -> VerifyResult<CycleRecord> {
        let path = self.record_path(key);
        let bytes = fs::read(&path).map_err(|e| VerifyError::persistence(&path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn contains(&self, key: &CycleKey) -> bool {
        self.record_path(key).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::outcome::{ObjectAttributes, Outcome, OutcomeContext, OutcomeRecord};
    use crate::core_modules::storm_object::test_shapes::centered;
    use chrono::TimeZone;

    fn key() -> CycleKey {
        CycleKey::new(
            NaiveDate::from_ymd_opt(2021, 5, 14).unwrap(),
            Utc.with_ymd_and_hms(2021, 5, 14, 20, 30, 0).unwrap(),
            "wofs",
        )
    }

    fn record() -> CycleRecord {
        let mut outcomes = CycleOutcomes::new();
        let ctx = OutcomeContext::new(key().init_time, key().init_time, 1);
        outcomes.push(OutcomeRecord {
            context: ctx,
            outcome: Outcome::Miss {
                truth: ObjectAttributes::truth(&centered(3, 4, 4, 3).with_age(300)),
            },
        });
        let summary = outcomes.summary();
        CycleRecord {
            key: key(),
            metadata: RunMetadata::from_config(&VerificationConfig::default()),
            outcomes,
            missing_times: Vec::new(),
            zero_times: vec![key().init_time + chrono::Duration::minutes(5)],
            summary,
            truth_timeline: vec![
                TimelineStep::from(&TruthStep {
                    valid_time: key().init_time,
                    status: FieldStatus::Present,
                    objects: vec![centered(3, 4, 4, 3).with_age(300)],
                }),
                TimelineStep {
                    valid_time: key().init_time + chrono::Duration::minutes(5),
                    status: FieldStatus::Zero,
                    objects: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn key_layout() {
        assert_eq!(key().relative_stem(), PathBuf::from("20210514/2030_wofs"));
        assert_eq!(key().to_string(), "20210514/2030/wofs");
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirectoryStore::new(dir.path());
        assert!(!store.contains(&key()));

        let path = store.write(&record()).unwrap();
        assert!(path.ends_with("20210514/2030_wofs.json"));
        assert!(store.contains(&key()));
        assert!(!path.with_extension("tmp").exists());

        let back = store.read(&key()).unwrap();
        assert_eq!(back, record());
        assert_eq!(back.truth_timeline.len(), 2);
        assert_eq!(back.truth_timeline[0].objects[0].age, Some(300));
        assert_eq!(back.truth_timeline[1].status, FieldStatus::Zero);
    }

    #[test]
    fn unwritable_root_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();
        let store = JsonDirectoryStore::new(&blocker);
        assert!(matches!(
            store.write(&record()),
            Err(VerifyError::Persistence { .. })
        ));
    }
}
