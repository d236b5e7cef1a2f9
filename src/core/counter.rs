use std::fmt;

/// Time scales tracked by the environment counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeScale {
    Run,
    Epoch,
    Trial,
}

impl fmt::Display for TimeScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeScale::Run => "Run",
            TimeScale::Epoch => "Epoch",
            TimeScale::Trial => "Trial",
        };
        f.write_str(s)
    }
}

/// One level of the Run / Epoch / Trial hierarchy.
///
/// `cur` is signed so a freshly initialized trial counter can sit at `-1`
/// ("before first") and land on 0 with its first increment.
/// `max == 0` means unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counter {
    pub cur: i64,
    pub prev: i64,
    pub max: i64,
    pub changed: bool,
}

impl Counter {
    pub fn with_max(max: i64) -> Self {
        Self {
            max,
            ..Self::default()
        }
    }

    /// Resets to zero, keeping `max`.
    pub fn init(&mut self) {
        self.cur = 0;
        self.prev = 0;
        self.changed = false;
    }

    /// Marks the counter as unchanged for the current step.
    pub fn same(&mut self) {
        self.changed = false;
    }

    /// Increments; returns true when `max` was reached and the counter wrapped to 0.
    pub fn incr(&mut self) -> bool {
        self.changed = true;
        self.prev = self.cur;
        self.cur += 1;
        if self.max > 0 && self.cur >= self.max {
            self.cur = 0;
            return true;
        }
        false
    }

    /// Sets `cur` directly; returns true if the value differs.
    pub fn set(&mut self, cur: i64) -> bool {
        if self.cur == cur {
            self.changed = false;
            return false;
        }
        self.changed = true;
        self.prev = self.cur;
        self.cur = cur;
        true
    }

    /// `cur` as an index; the "before first" state maps to 0.
    pub fn index(&self) -> usize {
        self.cur.max(0) as usize
    }
}

/// Nested Run / Epoch / Trial counters.
///
/// Only a trial wrap advances the epoch. The run is advanced explicitly by the
/// scheduler when the epoch reaches its maximum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub run: Counter,
    pub epoch: Counter,
    pub trial: Counter,
}

impl Counters {
    pub fn new(max_runs: i64, max_trials: i64) -> Self {
        Self {
            run: Counter::with_max(max_runs),
            epoch: Counter::default(),
            trial: Counter::with_max(max_trials),
        }
    }

    /// Starts `run` over: epoch 0, trial "before first".
    pub fn init(&mut self, run: i64) {
        self.run.init();
        self.epoch.init();
        self.trial.init();
        self.run.cur = run;
        self.trial.cur = -1;
    }

    /// Advances the trial; returns true when the epoch changed.
    pub fn step(&mut self) -> bool {
        self.epoch.same();
        if self.trial.incr() {
            self.epoch.incr();
            return true;
        }
        false
    }

    /// `(cur, prev, changed)` for one scale.
    pub fn counter(&self, scale: TimeScale) -> (i64, i64, bool) {
        let c = match scale {
            TimeScale::Run => &self.run,
            TimeScale::Epoch => &self.epoch,
            TimeScale::Trial => &self.trial,
        };
        (c.cur, c.prev, c.changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eighty_one_steps_wrap_trial_once() {
        let mut c = Counters::new(10, 80);
        c.init(0);
        let mut epoch_changes = 0;
        for step in 1..=81 {
            let chg = c.step();
            if chg {
                epoch_changes += 1;
                assert_eq!(step, 81);
            }
        }
        assert_eq!(epoch_changes, 1);
        assert_eq!(c.trial.cur, 0);
        assert_eq!(c.epoch.cur, 1);
        assert_eq!(c.counter(TimeScale::Epoch), (1, 0, true));
    }

    #[test]
    fn epoch_change_flag_clears_on_next_step() {
        let mut c = Counters::new(1, 2);
        c.init(0);
        c.step();
        c.step();
        assert!(c.step());
        assert!(!c.step());
        assert!(!c.epoch.changed);
    }

    #[test]
    fn run_wraps_at_max() {
        let mut run = Counter::with_max(2);
        assert!(!run.incr());
        assert!(run.incr());
        assert_eq!(run.cur, 0);
    }

    #[test]
    fn set_reports_difference() {
        let mut c = Counter::default();
        assert!(c.set(3));
        assert_eq!(c.prev, 0);
        assert!(!c.set(3));
    }
}
