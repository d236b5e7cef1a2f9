/// Elementary update steps ("cycles") per quarter.
pub const CYCLES_PER_QUARTER: usize = 25;
/// Quarters per alpha cycle.
pub const QUARTERS: usize = 4;
/// Elementary steps per trial.
pub const CYCLES_PER_TRIAL: usize = CYCLES_PER_QUARTER * QUARTERS;

pub type Cycle = u64;

/// Position inside one alpha-cycle trial.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlphaTime {
    /// Cycle within the current trial, 0..100.
    pub cycle: usize,
    /// Quarter (phase) index, 0..4.
    pub quarter: usize,
    /// Cycle within the current quarter, 0..25.
    pub quarter_cycle: usize,
    /// Cycles since the last `reset`, across trials.
    pub cycle_tot: Cycle,
    /// True while the readout layer is clamped to its plus-phase drive.
    pub plus_phase: bool,
}

impl AlphaTime {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn alpha_cyc_start(&mut self) {
        self.cycle = 0;
        self.quarter = 0;
        self.quarter_cycle = 0;
        self.plus_phase = false;
    }

    pub fn cycle_inc(&mut self) {
        self.cycle += 1;
        self.quarter_cycle += 1;
        self.cycle_tot = self.cycle_tot.saturating_add(1);
    }

    pub fn quarter_inc(&mut self) {
        self.quarter += 1;
        self.quarter_cycle = 0;
        self.plus_phase = self.quarter == QUARTERS - 1;
    }

    pub fn is_last_quarter(&self) -> bool {
        self.quarter + 1 == QUARTERS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_trial_walks_every_cycle_once() {
        let mut t = AlphaTime::default();
        t.alpha_cyc_start();
        let mut seen = 0;
        for q in 0..QUARTERS {
            assert_eq!(t.quarter, q);
            assert_eq!(t.plus_phase, q == QUARTERS - 1);
            for c in 0..CYCLES_PER_QUARTER {
                assert_eq!(t.quarter_cycle, c);
                assert_eq!(t.cycle, q * CYCLES_PER_QUARTER + c);
                t.cycle_inc();
                seen += 1;
            }
            t.quarter_inc();
        }
        assert_eq!(seen, CYCLES_PER_TRIAL);
        assert_eq!(t.cycle_tot, CYCLES_PER_TRIAL as Cycle);
    }

    #[test]
    fn trial_start_keeps_total() {
        let mut t = AlphaTime::default();
        for _ in 0..7 {
            t.cycle_inc();
        }
        t.alpha_cyc_start();
        assert_eq!(t.cycle, 0);
        assert_eq!(t.cycle_tot, 7);
        t.reset();
        assert_eq!(t.cycle_tot, 0);
    }
}
