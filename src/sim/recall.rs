//! Per-unit recall scoring on the readout layer.
//!
//! Each unit is classified by its full-pattern target: off-target units can
//! only produce false positives; on-target units can be missed, and those that
//! were absent from the cue are completion units. A ratio whose cohort is empty
//! is reported as `None`.

use serde::Serialize;

/// Activation level separating "on" from "off".
pub const ON_THRESHOLD: f32 = 0.5;

/// Default proportion below which an error ratio counts as recalled.
pub const DEFAULT_MEM_THRESHOLD: f64 = 0.34;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecallCounts {
    pub on_target: usize,
    pub off_target: usize,
    pub completion: usize,
    pub on_target_miss: usize,
    pub completion_miss: usize,
    pub false_positive: usize,
}

impl RecallCounts {
    /// Classifies `n` units. Slices are truncated to the shortest length.
    pub fn tally(comparison: &[f32], target: &[f32], driving: &[f32]) -> Self {
        let mut c = Self::default();
        for ((&cmp, &trg), &drv) in comparison.iter().zip(target).zip(driving) {
            if trg < ON_THRESHOLD {
                c.off_target += 1;
                if cmp > ON_THRESHOLD {
                    c.false_positive += 1;
                }
                continue;
            }
            c.on_target += 1;
            let completion = drv < ON_THRESHOLD;
            if completion {
                c.completion += 1;
            }
            if cmp < ON_THRESHOLD {
                c.on_target_miss += 1;
                if completion {
                    c.completion_miss += 1;
                }
            }
        }
        c
    }

    pub fn hit_all(&self) -> Option<f64> {
        ratio(self.on_target_miss, self.on_target)
    }

    pub fn hit_completion(&self) -> Option<f64> {
        ratio(self.completion_miss, self.completion)
    }

    pub fn false_positive(&self) -> Option<f64> {
        ratio(self.false_positive, self.off_target)
    }
}

fn ratio(num: usize, den: usize) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

/// `true` only for an available ratio strictly below `thr`.
fn below(r: Option<f64>, thr: f64) -> bool {
    matches!(r, Some(v) if v < thr)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct RecallOutcome {
    /// On-target misses over on-target units.
    pub hit_all: Option<f64>,
    /// Completion misses over completion units.
    pub hit_completion: Option<f64>,
    /// False positives over off-target units.
    pub false_positive: Option<f64>,
    pub is_hit: bool,
    pub counts: RecallCounts,
}

impl RecallOutcome {
    /// The miss ratio reported for the trial: all on-target bits when
    /// training, completion bits when evaluating.
    pub fn trg_on_was_off(&self, train: bool) -> Option<f64> {
        if train {
            self.hit_all
        } else {
            self.hit_completion
        }
    }
}

/// Holds the memory criterion and the last `is_hit`.
///
/// During evaluation a trial without completion units does not recompute the
/// hit flag; the previous trial's value is reported again.
#[derive(Clone, Debug)]
pub struct RecallScorer {
    threshold: f64,
    last_hit: bool,
}

impl RecallScorer {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            last_hit: false,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn last_hit(&self) -> bool {
        self.last_hit
    }

    /// Forgets the carried hit flag (new run).
    pub fn reset(&mut self) {
        self.last_hit = false;
    }

    pub fn score(
        &mut self,
        train: bool,
        comparison: &[f32],
        target: &[f32],
        driving: &[f32],
    ) -> RecallOutcome {
        let counts = RecallCounts::tally(comparison, target, driving);
        let hit_all = counts.hit_all();
        let hit_completion = counts.hit_completion();
        let false_positive = counts.false_positive();
        let thr = self.threshold;

        if train {
            self.last_hit = below(hit_all, thr) && below(false_positive, thr);
        } else if counts.completion > 0 {
            self.last_hit = below(hit_completion, thr) && below(false_positive, thr);
        }

        RecallOutcome {
            hit_all,
            hit_completion,
            false_positive,
            is_hit: self.last_hit,
            counts,
        }
    }
}

impl Default for RecallScorer {
    fn default() -> Self {
        Self::new(DEFAULT_MEM_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const TARGET: [f32; 8] = [1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
    const CUE: [f32; 8] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
    const RECALL: [f32; 8] = [0.9, 0.2, 0.1, 0.05, 0.8, 0.1, 0.05, 0.85];

    #[test]
    fn completion_scenario() {
        let mut scorer = RecallScorer::new(0.34);
        let out = scorer.score(false, &RECALL, &TARGET, &CUE);
        assert_eq!(out.counts.on_target, 4);
        assert_eq!(out.counts.completion, 1);
        assert_eq!(out.counts.on_target_miss, 1);
        assert_eq!(out.counts.off_target, 4);
        assert_relative_eq!(out.hit_all.unwrap(), 0.25);
        assert_relative_eq!(out.hit_completion.unwrap(), 1.0);
        assert_relative_eq!(out.false_positive.unwrap(), 0.0);
        assert!(!out.is_hit);
    }

    #[test]
    fn training_uses_all_on_target_bits() {
        let mut scorer = RecallScorer::new(0.34);
        let out = scorer.score(true, &RECALL, &TARGET, &CUE);
        assert!(out.is_hit, "0.25 < 0.34 and no false positives");
        assert_eq!(out.trg_on_was_off(true), out.hit_all);
    }

    #[test]
    fn evaluation_without_completion_units_carries_previous_hit() {
        let mut scorer = RecallScorer::new(0.34);
        scorer.score(true, &RECALL, &TARGET, &CUE);
        assert!(scorer.last_hit());

        // Full cue: no completion units, everything wrong.
        let wrong = [0.0; 8];
        let out = scorer.score(false, &wrong, &TARGET, &TARGET);
        assert_eq!(out.counts.completion, 0);
        assert_eq!(out.hit_completion, None);
        assert!(out.is_hit, "flag carried from the previous trial");
    }

    #[test]
    fn empty_cohorts_are_unavailable() {
        let mut scorer = RecallScorer::new(0.34);
        let all_off = [0.0; 4];
        let out = scorer.score(true, &all_off, &all_off, &all_off);
        assert_eq!(out.hit_all, None);
        assert_eq!(out.false_positive, Some(0.0));
        assert!(!out.is_hit, "unavailable ratio never passes the criterion");

        let all_on = [1.0; 4];
        let out = scorer.score(true, &all_on, &all_on, &all_on);
        assert_eq!(out.false_positive, None);
        assert_eq!(out.hit_all, Some(0.0));
        assert!(!out.is_hit);
    }

    #[test]
    fn ratios_stay_in_unit_interval() {
        let mut scorer = RecallScorer::default();
        let cmp = [0.7, 0.3, 0.9, 0.1, 0.6, 0.4];
        let trg = [1.0, 1.0, 0.0, 0.0, 1.0, 0.0];
        let drv = [0.0, 0.0, 0.0, 1.0, 1.0, 0.0];
        let out = scorer.score(false, &cmp, &trg, &drv);
        for r in [out.hit_all, out.hit_completion, out.false_positive] {
            let v = r.unwrap();
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn reset_clears_carried_flag() {
        let mut scorer = RecallScorer::new(0.34);
        scorer.score(true, &RECALL, &TARGET, &CUE);
        scorer.reset();
        assert!(!scorer.last_hit());
    }
}
