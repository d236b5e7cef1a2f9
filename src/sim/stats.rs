use serde::Serialize;

use super::recall::RecallOutcome;

/// Scalar error measures of one trial, read from the readout layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct TrialStats {
    pub sse: f64,
    pub avg_sse: f64,
    pub cos_diff: f64,
}

impl TrialStats {
    /// Any supra-tolerance unit error makes the trial an error trial.
    pub fn is_error(&self) -> bool {
        self.sse != 0.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct EpochSummary {
    pub sse: f64,
    pub avg_sse: f64,
    pub cos_diff: f64,
    pub pct_err: f64,
    pub pct_cor: f64,
}

/// Running sums over the trials of one epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EpochAccumulator {
    pub sum_sse: f64,
    pub sum_avg_sse: f64,
    pub sum_cos_diff: f64,
    pub err_count: usize,
}

impl EpochAccumulator {
    pub fn accumulate(&mut self, sse: f64, avg_sse: f64, cos_diff: f64, is_error_trial: bool) {
        self.sum_sse += sse;
        self.sum_avg_sse += avg_sse;
        self.sum_cos_diff += cos_diff;
        if is_error_trial {
            self.err_count += 1;
        }
    }

    pub fn accumulate_trial(&mut self, stats: &TrialStats) {
        self.accumulate(stats.sse, stats.avg_sse, stats.cos_diff, stats.is_error());
    }

    /// Divides the sums by `trial_count` and zeroes the accumulator.
    pub fn finalize(&mut self, trial_count: usize) -> EpochSummary {
        let nt = trial_count.max(1) as f64;
        let pct_err = self.err_count as f64 / nt;
        let summary = EpochSummary {
            sse: self.sum_sse / nt,
            avg_sse: self.sum_avg_sse / nt,
            cos_diff: self.sum_cos_diff / nt,
            pct_err,
            pct_cor: 1.0 - pct_err,
        };
        *self = Self::default();
        summary
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// First epoch whose training error count was zero; written once per run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FirstSuccessEpoch(Option<usize>);

impl FirstSuccessEpoch {
    pub fn get(&self) -> Option<usize> {
        self.0
    }

    /// Returns true if this call set the value.
    pub fn record(&mut self, epoch: usize, pct_err: f64) -> bool {
        if self.0.is_none() && pct_err == 0.0 {
            self.0 = Some(epoch);
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.0 = None;
    }
}

/// Mean of a series of possibly unavailable values.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OptMean {
    sum: f64,
    n: usize,
}

impl OptMean {
    pub fn push(&mut self, v: Option<f64>) {
        if let Some(v) = v {
            self.sum += v;
            self.n += 1;
        }
    }

    pub fn mean(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

/// Recall means over a set of trials.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RecallMeans {
    mem: OptMean,
    trg_on_was_off: OptMean,
    trg_off_was_on: OptMean,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct RecallSummary {
    /// Fraction of trials meeting the memory criterion.
    pub mem_pct: Option<f64>,
    pub trg_on_was_off: Option<f64>,
    pub trg_off_was_on: Option<f64>,
}

impl RecallMeans {
    pub fn push(&mut self, outcome: &RecallOutcome, train: bool) {
        self.mem.push(Some(if outcome.is_hit { 1.0 } else { 0.0 }));
        self.trg_on_was_off.push(outcome.trg_on_was_off(train));
        self.trg_off_was_on.push(outcome.false_positive);
    }

    /// Returns the means and starts over.
    pub fn take(&mut self) -> RecallSummary {
        let s = RecallSummary {
            mem_pct: self.mem.mean(),
            trg_on_was_off: self.trg_on_was_off.mean(),
            trg_off_was_on: self.trg_off_was_on.mean(),
        };
        *self = Self::default();
        s
    }
}

/// Summary of one full evaluation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct TestSummary {
    pub trials: usize,
    /// Summed (not averaged) over trials.
    pub sse: f64,
    pub avg_sse: f64,
    pub pct_err: f64,
    pub pct_cor: f64,
    pub cos_diff: f64,
    pub recall: RecallSummary,
}

/// Collects evaluation trials into a [`TestSummary`].
#[derive(Clone, Debug, Default)]
pub struct TestAccumulator {
    trials: usize,
    sum_sse: f64,
    sum_avg_sse: f64,
    sum_cos_diff: f64,
    errors: usize,
    recall: RecallMeans,
}

impl TestAccumulator {
    pub fn push(&mut self, stats: &TrialStats, outcome: &RecallOutcome) {
        self.trials += 1;
        self.sum_sse += stats.sse;
        self.sum_avg_sse += stats.avg_sse;
        self.sum_cos_diff += stats.cos_diff;
        if stats.sse > 0.0 {
            self.errors += 1;
        }
        self.recall.push(outcome, false);
    }

    pub fn finish(mut self) -> TestSummary {
        let n = self.trials.max(1) as f64;
        let pct_err = if self.trials > 0 {
            self.errors as f64 / n
        } else {
            0.0
        };
        TestSummary {
            trials: self.trials,
            sse: self.sum_sse,
            avg_sse: self.sum_avg_sse / n,
            pct_err,
            pct_cor: if self.trials > 0 { 1.0 - pct_err } else { 0.0 },
            cos_diff: self.sum_cos_diff / n,
            recall: self.recall.take(),
        }
    }
}

/// Descriptive statistics of one column across runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Describe {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl Describe {
    pub fn of(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let values: Vec<f64> = values.into_iter().collect();
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            count: values.len(),
            mean,
            std: var.sqrt(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn finalize_divides_and_zeroes() {
        let mut acc = EpochAccumulator::default();
        acc.accumulate(2.0, 0.25, 0.5, true);
        acc.accumulate(0.0, 0.0, 1.0, false);
        acc.accumulate(1.0, 0.125, 0.9, true);
        acc.accumulate(0.0, 0.0, 1.0, false);
        let s = acc.finalize(4);
        assert_relative_eq!(s.sse, 0.75);
        assert_relative_eq!(s.avg_sse, 0.09375);
        assert_relative_eq!(s.cos_diff, 0.85);
        assert_relative_eq!(s.pct_err, 0.5);
        assert_relative_eq!(s.pct_cor, 0.5);
        assert!(acc.is_zero());
    }

    #[test]
    fn first_success_is_write_once() {
        let mut first = FirstSuccessEpoch::default();
        assert!(!first.record(0, 0.5));
        assert!(first.record(3, 0.0));
        assert!(!first.record(4, 0.0));
        assert_eq!(first.get(), Some(3));
        first.reset();
        assert_eq!(first.get(), None);
    }

    #[test]
    fn recall_means_skip_unavailable() {
        let mut means = RecallMeans::default();
        let a = RecallOutcome {
            hit_completion: Some(0.5),
            false_positive: Some(0.0),
            is_hit: true,
            ..RecallOutcome::default()
        };
        let b = RecallOutcome {
            hit_completion: None,
            false_positive: Some(0.5),
            ..RecallOutcome::default()
        };
        means.push(&a, false);
        means.push(&b, false);
        let s = means.take();
        assert_eq!(s.mem_pct, Some(0.5));
        assert_eq!(s.trg_on_was_off, Some(0.5));
        assert_eq!(s.trg_off_was_on, Some(0.25));
        assert_eq!(means.take().mem_pct, None);
    }

    #[test]
    fn test_summary_sums_sse_and_counts_errors() {
        let mut acc = TestAccumulator::default();
        let out = RecallOutcome::default();
        acc.push(&TrialStats { sse: 1.0, avg_sse: 0.5, cos_diff: 0.2 }, &out);
        acc.push(&TrialStats { sse: 0.0, avg_sse: 0.0, cos_diff: 1.0 }, &out);
        let s = acc.finish();
        assert_eq!(s.trials, 2);
        assert_relative_eq!(s.sse, 1.0);
        assert_relative_eq!(s.avg_sse, 0.25);
        assert_relative_eq!(s.pct_err, 0.5);
        assert_relative_eq!(s.cos_diff, 0.6);
    }

    #[test]
    fn describe_basic() {
        let d = Describe::of([1.0, 2.0, 3.0]).unwrap();
        assert_eq!(d.count, 3);
        assert_relative_eq!(d.mean, 2.0);
        assert_relative_eq!(d.min, 1.0);
        assert_relative_eq!(d.max, 3.0);
        assert!(Describe::of(std::iter::empty()).is_none());
    }
}
