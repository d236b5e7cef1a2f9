//! Pattern sets and the table-driven trial environment.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::SimError;
use crate::core::counter::{Counters, TimeScale};

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("failed to read patterns {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse patterns: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("set `{set}`: row `{row}` has {got} values for `{layer}`, expected {expected}")]
    Width {
        set: String,
        row: String,
        layer: String,
        expected: usize,
        got: usize,
    },
}

/// One row: a label plus external input per layer name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    pub inputs: BTreeMap<String, Vec<f32>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternSet {
    pub name: String,
    pub rows: Vec<Pattern>,
}

impl PatternSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every row must give each layer the same number of values.
    pub fn validate(&self) -> Result<(), PatternError> {
        let mut widths: BTreeMap<&str, usize> = BTreeMap::new();
        for row in &self.rows {
            for (layer, vals) in &row.inputs {
                let expected = *widths.entry(layer.as_str()).or_insert(vals.len());
                if vals.len() != expected {
                    return Err(PatternError::Width {
                        set: self.name.clone(),
                        row: row.name.clone(),
                        layer: layer.clone(),
                        expected,
                        got: vals.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// The statistical and episodic training sets plus the fixed-order test set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternBank {
    pub train_statistical: PatternSet,
    pub train_episodic: PatternSet,
    pub test: PatternSet,
}

/// Which training set drives the training environment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrainSet {
    #[default]
    Statistical,
    Episodic,
}

impl PatternBank {
    pub fn from_json_str(text: &str) -> Result<Self, PatternError> {
        let bank: Self = serde_json::from_str(text)?;
        bank.validate()?;
        Ok(bank)
    }

    pub fn load(path: &Path) -> Result<Self, PatternError> {
        let text = fs::read_to_string(path).map_err(|source| PatternError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), PatternError> {
        self.train_statistical.validate()?;
        self.train_episodic.validate()?;
        self.test.validate()
    }

    pub fn train(&self, which: TrainSet) -> &PatternSet {
        match which {
            TrainSet::Statistical => &self.train_statistical,
            TrainSet::Episodic => &self.train_episodic,
        }
    }

    /// Random sparse items labelled A, B, C, ...
    ///
    /// Training rows present the full item on both `input_layer` and
    /// `target_layer`; the statistical set repeats each item `reps` times,
    /// the episodic set shows each once. Test rows drop one active bit from
    /// the cue so recall has to complete it.
    pub fn generate(
        width: usize,
        items: usize,
        active: usize,
        reps: usize,
        input_layer: &str,
        target_layer: &str,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let active = active.clamp(1, width.max(1));
        let mut units: Vec<usize> = (0..width).collect();
        let mut fulls = Vec::with_capacity(items);
        for _ in 0..items {
            units.shuffle(&mut rng);
            let mut full = vec![0.0f32; width];
            for &u in units.iter().take(active) {
                full[u] = 1.0;
            }
            fulls.push(full);
        }

        let label = |i: usize| {
            let letter = (b'A' + (i % 26) as u8) as char;
            if i < 26 {
                letter.to_string()
            } else {
                format!("{letter}{}", i / 26)
            }
        };
        let row = |name: String, cue: &[f32], full: &[f32]| Pattern {
            name,
            inputs: BTreeMap::from([
                (input_layer.to_string(), cue.to_vec()),
                (target_layer.to_string(), full.to_vec()),
            ]),
        };

        let mut statistical = Vec::with_capacity(items * reps);
        for _ in 0..reps.max(1) {
            for (i, full) in fulls.iter().enumerate() {
                statistical.push(row(label(i), full.as_slice(), full.as_slice()));
            }
        }
        let episodic = fulls
            .iter()
            .enumerate()
            .map(|(i, full)| row(label(i), full.as_slice(), full.as_slice()))
            .collect();
        let test = fulls
            .iter()
            .enumerate()
            .map(|(i, full)| {
                let mut cue = full.clone();
                let on: Vec<usize> = (0..width).filter(|&u| full[u] > 0.5).collect();
                if on.len() > 1 {
                    cue[on[rng.random_range(0..on.len())]] = 0.0;
                }
                row(label(i), cue.as_slice(), full.as_slice())
            })
            .collect();

        Self {
            train_statistical: PatternSet {
                name: "TrainSL".to_string(),
                rows: statistical,
            },
            train_episodic: PatternSet {
                name: "TrainEpisodic".to_string(),
                rows: episodic,
            },
            test: PatternSet {
                name: "TestSL".to_string(),
                rows: test,
            },
        }
    }
}

/// Iterates a pattern set under Run / Epoch / Trial counters.
///
/// The trial counter wraps after `trial_max` steps (the set length unless
/// overridden). Non-sequential environments draw a fresh permutation at every
/// epoch from a seeded generator.
#[derive(Clone, Debug)]
pub struct PatternEnv {
    name: String,
    set: PatternSet,
    counters: Counters,
    order: Vec<usize>,
    sequential: bool,
    trial_max: Option<usize>,
    seed: u64,
    rng: StdRng,
    trial_name: String,
}

impl PatternEnv {
    pub fn new(name: &str, set: PatternSet, sequential: bool, seed: u64) -> Self {
        Self {
            name: name.to_string(),
            set,
            counters: Counters::default(),
            order: Vec::new(),
            sequential,
            trial_max: None,
            seed,
            rng: StdRng::seed_from_u64(seed),
            trial_name: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set(&self) -> &PatternSet {
        &self.set
    }

    /// Replaces the patterns; takes effect at the next `init`.
    pub fn set_patterns(&mut self, set: PatternSet) {
        self.set = set;
    }

    pub fn set_trial_max(&mut self, trial_max: Option<usize>) {
        self.trial_max = trial_max;
    }

    pub fn set_run_max(&mut self, max_runs: usize) {
        self.counters.run.max = max_runs as i64;
    }

    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
    }

    /// Trials per epoch.
    pub fn trials_per_epoch(&self) -> usize {
        self.trial_max.unwrap_or(self.set.len())
    }

    /// Resets counters for `run`. Fails on an empty pattern set.
    pub fn init(&mut self, run: i64) -> Result<(), SimError> {
        if self.set.is_empty() {
            return Err(SimError::EmptyPatterns(self.name.clone()));
        }
        let run_max = self.counters.run.max;
        self.counters = Counters::new(run_max, self.trials_per_epoch() as i64);
        self.counters.init(run);
        self.rng = StdRng::seed_from_u64(self.seed.wrapping_add(run as u64));
        self.order = (0..self.set.len()).collect();
        if !self.sequential {
            self.order.shuffle(&mut self.rng);
        }
        self.trial_name.clear();
        Ok(())
    }

    /// Advances one trial; returns true when the epoch changed.
    pub fn step(&mut self) -> bool {
        let chg = self.counters.step();
        if chg && !self.sequential {
            self.order.shuffle(&mut self.rng);
        }
        self.update_trial_name();
        chg
    }

    pub fn counter(&self, scale: TimeScale) -> (i64, i64, bool) {
        self.counters.counter(scale)
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub(crate) fn counters_mut(&mut self) -> &mut Counters {
        &mut self.counters
    }

    /// Puts back counters saved earlier, trial label included.
    pub(crate) fn restore_counters(&mut self, counters: Counters) {
        self.counters = counters;
        self.update_trial_name();
    }

    /// True once `init` has laid out a presentation order.
    pub fn is_initialized(&self) -> bool {
        !self.order.is_empty()
    }

    /// Points the trial counter at `trial` without touching epoch state.
    pub fn set_trial(&mut self, trial: i64) {
        self.counters.trial.cur = trial;
        self.update_trial_name();
    }

    /// Row index of the current trial.
    pub fn current_row(&self) -> Option<usize> {
        if self.order.is_empty() || self.counters.trial.cur < 0 {
            return None;
        }
        Some(self.order[self.counters.trial.index() % self.order.len()])
    }

    pub fn trial_name(&self) -> &str {
        &self.trial_name
    }

    /// External input for `layer` on the current trial.
    pub fn state(&self, layer: &str) -> Option<&[f32]> {
        let row = self.current_row()?;
        self.set.rows[row].inputs.get(layer).map(Vec::as_slice)
    }

    fn update_trial_name(&mut self) {
        self.trial_name = match self.current_row() {
            Some(row) => self.set.rows[row].name.clone(),
            None => String::new(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> PatternBank {
        PatternBank::generate(8, 4, 3, 2, "Input", "ECout", 11)
    }

    #[test]
    fn generated_bank_shapes() {
        let b = bank();
        assert_eq!(b.train_statistical.len(), 8);
        assert_eq!(b.train_episodic.len(), 4);
        assert_eq!(b.test.len(), 4);
        b.validate().unwrap();
        for row in &b.test.rows {
            let cue = &row.inputs["Input"];
            let full = &row.inputs["ECout"];
            let cue_on = cue.iter().filter(|&&v| v > 0.5).count();
            let full_on = full.iter().filter(|&&v| v > 0.5).count();
            assert_eq!(full_on, 3);
            assert_eq!(cue_on, 2, "one bit left for completion");
        }
    }

    #[test]
    fn empty_set_fails_fast() {
        let mut env = PatternEnv::new("TrainEnv", PatternSet::default(), false, 0);
        let err = env.init(0).unwrap_err();
        assert!(matches!(err, SimError::EmptyPatterns(name) if name == "TrainEnv"));
    }

    #[test]
    fn sequential_env_visits_rows_in_order() {
        let mut env = PatternEnv::new("TestEnv", bank().test, true, 0);
        env.init(0).unwrap();
        let names: Vec<String> = (0..4)
            .map(|_| {
                assert!(!env.step());
                env.trial_name().to_string()
            })
            .collect();
        assert_eq!(names, ["A", "B", "C", "D"]);
        assert!(env.step(), "fifth step wraps the epoch");
        assert_eq!(env.counter(TimeScale::Epoch), (1, 0, true));
    }

    #[test]
    fn permuted_order_is_seeded() {
        let mut a = PatternEnv::new("TrainEnv", bank().train_statistical, false, 5);
        let mut b = PatternEnv::new("TrainEnv", bank().train_statistical, false, 5);
        a.init(2).unwrap();
        b.init(2).unwrap();
        for _ in 0..20 {
            a.step();
            b.step();
            assert_eq!(a.current_row(), b.current_row());
        }
    }

    #[test]
    fn trial_override_wraps_rows() {
        let mut env = PatternEnv::new("TrainEnv", bank().train_episodic, true, 0);
        env.set_trial_max(Some(6));
        env.init(0).unwrap();
        for _ in 0..5 {
            env.step();
        }
        assert_eq!(env.current_row(), Some(0));
        assert!(!env.step());
        assert!(env.step());
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let json = r#"{
            "train_statistical": {"name": "T", "rows": [
                {"name": "A", "inputs": {"Input": [1, 0]}},
                {"name": "B", "inputs": {"Input": [1, 0, 0]}}
            ]},
            "train_episodic": {"name": "E", "rows": []},
            "test": {"name": "X", "rows": []}
        }"#;
        let err = PatternBank::from_json_str(json).unwrap_err();
        assert!(matches!(err, PatternError::Width { expected: 2, got: 3, .. }));
    }
}
