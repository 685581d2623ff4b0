// THEORY:
// The matcher solves the data association problem between two object sets that
// describe the same moment: the forecast objects of one ensemble member and the
// observed (truth) objects at the same valid time. Its output is a one-to-one
// pairing plus a classification of every object that could not be paired.
//
// Algorithm:
// 1.  **Score matrix**: total interest is computed once for every truth ×
//     forecast pair. This is the dominant cost; everything after it is index work.
// 2.  **Best-candidate pre-pass**: for each object, remember the single best
//     candidate on the other side whose interest exceeds the threshold. This is
//     only used at the end, to tell "nothing plausible nearby" apart from "a
//     plausible partner existed but a better pair claimed it".
// 3.  **Greedy rounds with duplicate repair**: every unmatched truth object
//     claims the unmatched forecast object with the strictly highest interest.
//     When several truth objects claim the same forecast, the highest claim wins
//     and the others retry next round against what is left. Rounds stop when a
//     round produces no duplicate claims, when nothing is left to claim, or at
//     the iteration cap.
// 4.  **Classification**: paired objects are hits. An unpaired forecast is an
//     Extra if its pre-pass best candidate exists, else a false alarm; an
//     unpaired truth object is a TruthExtra or a miss by the same rule.
//
// Ties are broken by input order: among equal scores, the earlier object wins.
// The greedy policy is not a globally optimal assignment. Scenes hold tens of
// objects, rounds converge quickly, and the cap bounds the worst case.

use crate::core_modules::interest::{InterestParams, InterestScore, score};
use crate::core_modules::storm_object::StormObject;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Everything the matcher needs besides the two object sets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchParams {
    pub interest: InterestParams,
    /// Candidates must score strictly above this.
    pub ti_thresh: f64,
    pub max_iterations: usize,
}

/// Pairwise interest scores, indexed `[truth][forecast]`.
#[derive(Debug, Clone)]
pub struct ScoreMatrix {
    n_truth: usize,
    n_forecast: usize,
    scores: Vec<InterestScore>,
}

impl ScoreMatrix {
    pub fn compute(truth: &[StormObject], forecast: &[StormObject], params: &InterestParams) -> Self {
        let mut scores = Vec::with_capacity(truth.len() * forecast.len());
        for t in truth {
            for f in forecast {
                scores.push(score(t, f, params));
            }
        }
        Self {
            n_truth: truth.len(),
            n_forecast: forecast.len(),
            scores,
        }
    }

    /// Builds a matrix from total interest values alone.
    pub fn from_totals(n_truth: usize, n_forecast: usize, total: impl Fn(usize, usize) -> f64) -> Self {
        let mut scores = Vec::with_capacity(n_truth * n_forecast);
        for t in 0..n_truth {
            for f in 0..n_forecast {
                scores.push(InterestScore {
                    total_interest: total(t, f),
                    ..Default::default()
                });
            }
        }
        Self {
            n_truth,
            n_forecast,
            scores,
        }
    }

    pub fn get(&self, truth: usize, forecast: usize) -> &InterestScore {
        &self.scores[truth * self.n_forecast + forecast]
    }

    fn total(&self, truth: usize, forecast: usize) -> f64 {
        self.get(truth, forecast).total_interest
    }
}

/// The best above-threshold partner of an object, found before matching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestCandidate {
    pub index: usize,
    pub total_interest: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchedPair {
    pub truth: usize,
    pub forecast: usize,
    pub score: InterestScore,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ForecastOutcome {
    Hit { truth: usize },
    Extra(BestCandidate),
    FalseAlarm,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TruthOutcome {
    Hit { forecast: usize },
    TruthExtra(BestCandidate),
    Miss,
}

/// The resolved assignment for one (member, valid time).
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub pairs: Vec<MatchedPair>,
    /// One entry per forecast object, in input order.
    pub forecast: Vec<ForecastOutcome>,
    /// One entry per truth object, in input order.
    pub truth: Vec<TruthOutcome>,
    pub iterations: usize,
    /// Set when the iteration cap stopped matching while claims were still contested.
    pub exhausted: bool,
}

impl MatchResult {
    pub fn hit_count(&self) -> usize {
        self.pairs.len()
    }
}

/// Matches forecast objects to truth objects.
pub fn match_objects(truth: &[StormObject], forecast: &[StormObject], params: &MatchParams) -> MatchResult {
    if truth.is_empty() || forecast.is_empty() {
        return MatchResult {
            pairs: Vec::new(),
            forecast: vec![ForecastOutcome::FalseAlarm; forecast.len()],
            truth: vec![TruthOutcome::Miss; truth.len()],
            iterations: 0,
            exhausted: false,
        };
    }

    let matrix = ScoreMatrix::compute(truth, forecast, &params.interest);
    resolve(&matrix, params.ti_thresh, params.max_iterations)
}

/// Runs the pre-pass, greedy rounds and classification over a score matrix.
pub fn resolve(matrix: &ScoreMatrix, ti_thresh: f64, max_iterations: usize) -> MatchResult {
    let (n_truth, n_forecast) = (matrix.n_truth, matrix.n_forecast);

    let best_truth_for: Vec<Option<BestCandidate>> = (0..n_forecast)
        .map(|f| best_above(ti_thresh, (0..n_truth).map(|t| (t, matrix.total(t, f)))))
        .collect();
    let best_forecast_for: Vec<Option<BestCandidate>> = (0..n_truth)
        .map(|t| best_above(ti_thresh, (0..n_forecast).map(|f| (f, matrix.total(t, f)))))
        .collect();

    let mut truth_partner: Vec<Option<usize>> = vec![None; n_truth];
    let mut forecast_partner: Vec<Option<usize>> = vec![None; n_forecast];
    let mut pairs = Vec::new();
    let mut iterations = 0;
    let mut exhausted = false;

    while iterations < max_iterations {
        iterations += 1;

        // Greedy pass: each unmatched truth claims its best unmatched forecast.
        let tentative: Vec<(usize, usize, f64)> = (0..n_truth)
            .filter(|&t| truth_partner[t].is_none())
            .filter_map(|t| {
                let open = (0..n_forecast)
                    .filter(|&f| forecast_partner[f].is_none())
                    .map(|f| (f, matrix.total(t, f)));
                best_above(ti_thresh, open).map(|best| (t, best.index, best.total_interest))
            })
            .collect();

        if tentative.is_empty() {
            break;
        }

        // Duplicate resolution: highest claim per forecast wins, earliest truth on ties.
        let mut winners: BTreeMap<usize, (usize, f64)> = BTreeMap::new();
        let mut duplicates = false;
        for (t, f, ti) in tentative {
            match winners.get_mut(&f) {
                Some(current) => {
                    duplicates = true;
                    if ti > current.1 {
                        *current = (t, ti);
                    }
                }
                None => {
                    winners.insert(f, (t, ti));
                }
            }
        }

        for (f, (t, _)) in winners {
            truth_partner[t] = Some(f);
            forecast_partner[f] = Some(t);
            pairs.push(MatchedPair {
                truth: t,
                forecast: f,
                score: *matrix.get(t, f),
            });
        }

        if !duplicates {
            break;
        }
        if iterations == max_iterations {
            exhausted = true;
        }
    }

    if exhausted {
        warn!(
            iterations,
            unmatched_truth = truth_partner.iter().filter(|p| p.is_none()).count(),
            "match iteration cap reached with contested claims"
        );
    }

    let forecast = (0..n_forecast)
        .map(|f| match (forecast_partner[f], best_truth_for[f]) {
            (Some(t), _) => ForecastOutcome::Hit { truth: t },
            (None, Some(best)) => ForecastOutcome::Extra(best),
            (None, None) => ForecastOutcome::FalseAlarm,
        })
        .collect();
    let truth = (0..n_truth)
        .map(|t| match (truth_partner[t], best_forecast_for[t]) {
            (Some(f), _) => TruthOutcome::Hit { forecast: f },
            (None, Some(best)) => TruthOutcome::TruthExtra(best),
            (None, None) => TruthOutcome::Miss,
        })
        .collect();

    debug!(iterations, hits = pairs.len(), "matching resolved");
    MatchResult {
        pairs,
        forecast,
        truth,
        iterations,
        exhausted,
    }
}

/// Highest score strictly above `threshold`; the first index wins ties.
fn best_above(threshold: f64, candidates: impl Iterator<Item = (usize, f64)>) -> Option<BestCandidate> {
    let mut best: Option<BestCandidate> = None;
    for (index, total_interest) in candidates {
        let floor = best.map_or(threshold, |b| b.total_interest);
        if total_interest > floor {
            best = Some(BestCandidate {
                index,
                total_interest,
            });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::storm_object::test_shapes::{centered, square};

    fn params() -> MatchParams {
        MatchParams {
            interest: InterestParams::new(40.0 / 3.0, 40.0 / 3.0),
            ti_thresh: 0.2,
            max_iterations: 5,
        }
    }

    /// Every object lands in exactly one category.
    fn assert_partition(result: &MatchResult, n_truth: usize, n_forecast: usize) {
        assert_eq!(result.truth.len(), n_truth);
        assert_eq!(result.forecast.len(), n_forecast);

        let f_hits = result
            .forecast
            .iter()
            .filter(|o| matches!(o, ForecastOutcome::Hit { .. }))
            .count();
        let t_hits = result
            .truth
            .iter()
            .filter(|o| matches!(o, TruthOutcome::Hit { .. }))
            .count();
        assert_eq!(f_hits, result.pairs.len());
        assert_eq!(t_hits, result.pairs.len());

        let mut seen_t = vec![false; n_truth];
        let mut seen_f = vec![false; n_forecast];
        for pair in &result.pairs {
            assert!(!seen_t[pair.truth] && !seen_f[pair.forecast], "double-counted pair");
            seen_t[pair.truth] = true;
            seen_f[pair.forecast] = true;
            assert_eq!(result.truth[pair.truth], TruthOutcome::Hit { forecast: pair.forecast });
            assert_eq!(result.forecast[pair.forecast], ForecastOutcome::Hit { truth: pair.truth });
        }
    }

    #[test]
    fn overlapping_pair_is_hit() {
        let truth = vec![centered(1, 10, 10, 3)];
        let forecast = vec![centered(1, 10, 11, 3)];
        let result = match_objects(&truth, &forecast, &params());
        assert_eq!(result.pairs.len(), 1);
        let s = result.pairs[0].score;
        assert!((s.centroid_interest - 0.925).abs() < 1e-3);
        assert_eq!(s.boundary_interest, 1.0);
        assert!((s.total_interest - 0.96).abs() < 0.01);
        assert_partition(&result, 1, 1);
    }

    #[test]
    fn distant_forecast_is_false_alarm() {
        let truth = vec![centered(1, 10, 10, 3)];
        let forecast = vec![centered(1, 80, 80, 3)];
        let result = match_objects(&truth, &forecast, &params());
        assert_eq!(result.forecast, vec![ForecastOutcome::FalseAlarm]);
        assert_eq!(result.truth, vec![TruthOutcome::Miss]);
    }

    #[test]
    fn empty_truth_makes_every_forecast_a_false_alarm() {
        let forecast = vec![centered(1, 10, 10, 3), centered(2, 30, 30, 3)];
        let result = match_objects(&[], &forecast, &params());
        assert_eq!(result.forecast, vec![ForecastOutcome::FalseAlarm; 2]);
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn empty_forecast_makes_every_truth_a_miss() {
        let truth = vec![centered(1, 10, 10, 3)];
        let result = match_objects(&truth, &[], &params());
        assert_eq!(result.truth, vec![TruthOutcome::Miss]);
    }

    #[test]
    fn contested_forecast_yields_extra_classification() {
        // Two forecasts near one truth: the closer one hits, the other is an Extra.
        let truth = vec![centered(1, 10, 10, 3)];
        let forecast = vec![centered(1, 10, 14, 3), centered(2, 10, 10, 3)];
        let result = match_objects(&truth, &forecast, &params());
        assert_eq!(result.forecast[1], ForecastOutcome::Hit { truth: 0 });
        match result.forecast[0] {
            ForecastOutcome::Extra(best) => {
                assert_eq!(best.index, 0);
                assert!(best.total_interest > 0.2);
            }
            other => panic!("expected extra, got {other:?}"),
        }
        assert_partition(&result, 1, 2);
    }

    #[test]
    fn duplicate_claims_are_repaired() {
        // Both truths prefer forecast 0; truth 0 scores higher and keeps it, truth 1
        // falls back to forecast 1 in the next round.
        let matrix = ScoreMatrix::from_totals(2, 2, |t, f| match (t, f) {
            (0, 0) => 0.9,
            (1, 0) => 0.8,
            (1, 1) => 0.5,
            _ => 0.0,
        });
        let result = resolve(&matrix, 0.2, 5);
        assert_eq!(result.truth[0], TruthOutcome::Hit { forecast: 0 });
        assert_eq!(result.truth[1], TruthOutcome::Hit { forecast: 1 });
        assert_eq!(result.iterations, 2);
        assert!(!result.exhausted);
    }

    #[test]
    fn equal_claims_keep_first_truth() {
        let matrix = ScoreMatrix::from_totals(2, 1, |_, _| 0.7);
        let result = resolve(&matrix, 0.2, 5);
        assert_eq!(result.truth[0], TruthOutcome::Hit { forecast: 0 });
        assert!(matches!(result.truth[1], TruthOutcome::TruthExtra(b) if b.index == 0));
    }

    #[test]
    fn iteration_cap_terminates_with_valid_partition() {
        // Seven truths all rank the forecasts identically, so each round only
        // resolves one contested forecast.
        let n = 7;
        let matrix = ScoreMatrix::from_totals(n, n, |t, f| 0.9 - 0.1 * f as f64 - 0.01 * t as f64);
        let result = resolve(&matrix, 0.2, 5);

        assert_eq!(result.iterations, 5);
        assert!(result.exhausted);
        assert_eq!(result.pairs.len(), 5);
        assert_partition(&result, n, n);

        for t in 5..n {
            assert!(matches!(result.truth[t], TruthOutcome::TruthExtra(b) if b.index == 0));
        }
        for f in 5..n {
            assert!(matches!(result.forecast[f], ForecastOutcome::Extra(b) if b.index == 0));
        }
    }

    #[test]
    fn geometric_scene_partitions() {
        let truth: Vec<StormObject> = (0..8).map(|i| square(i, 0, i as i32 * 4, 3)).collect();
        let forecast: Vec<StormObject> = (0..6)
            .map(|i| square(i, 1, 2 + i as i32 * 5, 3))
            .chain(std::iter::once(square(99, 200, 200, 2)))
            .collect();
        let result = match_objects(&truth, &forecast, &params());
        assert_partition(&result, truth.len(), forecast.len());
        assert_eq!(result.forecast[6], ForecastOutcome::FalseAlarm);
        assert!(result.iterations <= 5);
    }

    #[test]
    fn threshold_is_strict() {
        let matrix = ScoreMatrix::from_totals(1, 1, |_, _| 0.2);
        let result = resolve(&matrix, 0.2, 5);
        assert_eq!(result.truth[0], TruthOutcome::Miss);
        assert_eq!(result.forecast[0], ForecastOutcome::FalseAlarm);
    }
}
