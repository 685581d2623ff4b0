// THEORY:
// The `tracker` module gives observed storms a memory. Each valid time, the truth
// field is reduced to a fresh list of `StormObject`s that know nothing about the
// past; the tracker associates them with the objects of the previous valid time
// and derives how long each storm has existed.
//
// Key architectural principles:
// 1.  **Overlap, not proximity**: a current object continues a previous one only
//     if the two regions physically share at least one grid cell. No motion
//     prediction is attempted; at radar update intervals overlap is sufficient.
// 2.  **Oldest ancestor wins**: when a storm overlaps several predecessors (a
//     merger), it inherits the greatest predecessor age plus one time step.
// 3.  **Gaps reset memory**: a missing or all-quiet time step leaves nothing to
//     overlap with, so every object at the next step starts at age zero. The gap
//     itself is recorded as a `Missing` or `Zero` marker on the timeline instead
//     of being treated as a failure.
// 4.  **Strict time order**: age at time T depends only on T - 1, so `observe`
//     must be called in increasing valid-time order; anything else is rejected.

use crate::core_modules::error::{VerifyError, VerifyResult};
use crate::core_modules::field::FieldStatus;
use crate::core_modules::storm_object::StormObject;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Assigns ages to `current` from the objects of the previous time step.
pub fn track(
    current: Vec<StormObject>,
    previous: &[StormObject],
    time_step_seconds: i64,
) -> Vec<StormObject> {
    current
        .into_iter()
        .map(|obj| {
            let inherited = previous
                .iter()
                .filter(|prev| obj.overlaps(prev))
                .map(|prev| prev.age)
                .max();
            let age = inherited.map_or(0, |a| a + time_step_seconds);
            obj.with_age(age)
        })
        .collect()
}

/// The truth objects observed at one valid time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthStep {
    pub valid_time: DateTime<Utc>,
    pub status: FieldStatus,
    pub objects: Vec<StormObject>,
}

/// Accumulates the observed-object timeline of one forecast cycle.
#[derive(Debug)]
pub struct TruthTracker {
    time_step_seconds: i64,
    steps: Vec<TruthStep>,
}

impl TruthTracker {
    pub fn new(time_step_seconds: i64) -> Self {
        Self {
            time_step_seconds,
            steps: Vec::new(),
        }
    }

    /// Records the objects extracted at `valid_time` and returns them with ages.
    ///
    /// For `Missing` and `Zero` steps `objects` is ignored and the step is stored
    /// empty, which resets the age of everything seen afterwards. A `valid_time`
    /// not after the last observed one is an `OutOfOrder` error.
    pub fn observe(
        &mut self,
        valid_time: DateTime<Utc>,
        status: FieldStatus,
        objects: Vec<StormObject>,
    ) -> VerifyResult<&TruthStep> {
        if let Some(last) = self.steps.last() {
            if last.valid_time >= valid_time {
                return Err(VerifyError::OutOfOrder {
                    previous: last.valid_time,
                    next: valid_time,
                });
            }
        }

        let objects = match status {
            FieldStatus::Present => {
                let previous = self.previous_objects();
                track(objects, previous, self.time_step_seconds)
            }
            FieldStatus::Missing => {
                warn!(%valid_time, "truth field missing; ages reset");
                Vec::new()
            }
            FieldStatus::Zero => {
                warn!(%valid_time, "truth field below detection floor; ages reset");
                Vec::new()
            }
        };

        debug!(%valid_time, count = objects.len(), "truth objects tracked");
        self.steps.push(TruthStep {
            valid_time,
            status,
            objects,
        });
        Ok(&self.steps[self.steps.len() - 1])
    }

    fn previous_objects(&self) -> &[StormObject] {
        self.steps.last().map_or(&[], |s| s.objects.as_slice())
    }

    pub fn steps(&self) -> &[TruthStep] {
        &self.steps
    }

    pub fn total_objects(&self) -> usize {
        self.steps.iter().map(|s| s.objects.len()).sum()
    }

    pub fn times_with_status(&self, status: FieldStatus) -> Vec<DateTime<Utc>> {
        self.steps
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.valid_time)
            .collect()
    }
}
