//! Epoch and run scheduling.
//!
//! [`Sim`] walks the training environment one trial at a time. Epoch
//! boundaries finalize the training statistics and may trigger a full pass
//! over the evaluation set; once the epoch limit is reached the run is closed
//! and the next one starts with freshly seeded weights.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use super::SimError;
use super::alpha::AlphaCycleController;
use super::env::{PatternBank, PatternEnv, TrainSet};
use super::sink::{
    InstrumentSink, Record, RunRow, RunStats, SnapshotScale, TestEpochRow, TrainEpochRow, TrialKey,
    TrialRow,
};
use super::stats::{
    Describe, EpochAccumulator, FirstSuccessEpoch, OptMean, RecallMeans, TestAccumulator,
    TestSummary,
};
use crate::config::{AppConfig, NetworkConfig, RunConfig};
use crate::core::counter::{Counters, TimeScale};
use crate::net::{LayerId, Network};

/// Everything that stays fixed while the simulation runs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimConfig {
    pub run: RunConfig,
    pub network: NetworkConfig,
    pub snapshot_scale: SnapshotScale,
    pub snapshot_layers: Vec<String>,
}

impl From<&AppConfig> for SimConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            run: cfg.run.clone(),
            network: cfg.network.clone(),
            snapshot_scale: cfg.instrument.snapshot_scale,
            snapshot_layers: cfg.instrument.snapshot_layers.clone(),
        }
    }
}

/// Cooperative stop request, checked between trials.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shares an existing flag, e.g. one also set by a Ctrl-C handler.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a call to [`Sim::step_trial`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Ran one training trial.
    Trial,
    /// Closed an epoch, then ran the first trial of the next one.
    Epoch,
    /// Closed the last epoch of a run and started the next run.
    Run,
    /// All runs are finished.
    Done,
}

/// Mutable bookkeeping of the current run.
#[derive(Clone, Debug, Default)]
pub struct TrainingState {
    pub epoch: EpochAccumulator,
    pub recall: RecallMeans,
    pub first_zero: FirstSuccessEpoch,
    /// Evaluation passes of the current run, oldest first.
    pub test_history: Vec<TestSummary>,
    /// Rows of every finished run since `init`.
    pub run_rows: Vec<RunRow>,
    pub run_seed: u64,
}

impl TrainingState {
    fn reset_run(&mut self, seed: u64) {
        self.epoch = EpochAccumulator::default();
        self.recall = RecallMeans::default();
        self.first_zero.reset();
        self.test_history.clear();
        self.run_seed = seed;
    }
}

/// `tag_params`, or just the parameter set name without a tag.
pub fn run_name(tag: &str) -> String {
    const PARAMS: &str = "Base";
    if tag.is_empty() {
        PARAMS.to_string()
    } else {
        format!("{tag}_{PARAMS}")
    }
}

pub fn run_epoch_name(run: i64, epoch: i64) -> String {
    format!("{run:03}_{epoch:05}")
}

/// Per-run seed derived from the base seed.
pub fn run_seed(base: u64, run: i64) -> u64 {
    base ^ (run as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// The epoch/run scheduler: owns the network, both environments and the sink.
pub struct Sim<N, S> {
    cfg: SimConfig,
    net: N,
    ctl: AlphaCycleController,
    bank: PatternBank,
    train_env: PatternEnv,
    test_env: PatternEnv,
    state: TrainingState,
    sink: S,
    stop: StopHandle,
    base_seed: u64,
    input: LayerId,
    target: LayerId,
    done: bool,
}

impl<N: Network, S: InstrumentSink> Sim<N, S> {
    /// Resolves layer handles and sets up the environments. Call [`Sim::init`]
    /// before stepping.
    pub fn new(cfg: SimConfig, net: N, bank: PatternBank, sink: S) -> Result<Self, SimError> {
        let handles =
            crate::net::CircuitHandles::resolve(&net, &cfg.network, &cfg.snapshot_layers)?;
        let input = handles.input;
        let target = handles.ec_out;
        let ctl = AlphaCycleController::new(handles, cfg.run.mem_threshold, cfg.snapshot_scale);
        let base_seed = cfg.run.seed.unwrap_or_else(rand::random::<u64>);

        let mut train_env = PatternEnv::new(
            "TrainEnv",
            bank.train(cfg.run.train_set).clone(),
            !cfg.run.permute,
            base_seed,
        );
        train_env.set_trial_max((cfg.run.trials_per_epoch > 0).then_some(cfg.run.trials_per_epoch));
        train_env.set_run_max(cfg.run.max_runs);
        let test_env = PatternEnv::new("TestEnv", bank.test.clone(), true, base_seed);

        Ok(Self {
            cfg,
            net,
            ctl,
            bank,
            train_env,
            test_env,
            state: TrainingState::default(),
            sink,
            stop: StopHandle::new(),
            base_seed,
            input,
            target,
            done: false,
        })
    }

    /// Replaces the stop flag, e.g. with one shared with a signal handler.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.cfg
    }

    pub fn net(&self) -> &N {
        &self.net
    }

    pub fn net_mut(&mut self) -> &mut N {
        &mut self.net
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn train_env(&self) -> &PatternEnv {
        &self.train_env
    }

    pub fn test_env(&self) -> &PatternEnv {
        &self.test_env
    }

    pub fn controller(&self) -> &AlphaCycleController {
        &self.ctl
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn base_seed(&self) -> u64 {
        self.base_seed
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Starts over from run 0.
    pub fn init(&mut self) -> Result<(), SimError> {
        self.done = false;
        self.state.run_rows.clear();
        self.train_env.counters_mut().run.init();
        self.new_run()
    }

    /// Resets environments, weights and statistics for the run the training
    /// run counter points at.
    pub fn new_run(&mut self) -> Result<(), SimError> {
        let run = self.train_env.counters().run.cur;
        let seed = run_seed(self.base_seed, run);
        self.train_env.reseed(seed);
        self.test_env.reseed(seed);
        self.train_env.init(run)?;
        self.test_env.init(run)?;
        self.net.init_weights(seed);
        self.net.init_ext();
        self.ctl.reset();
        self.state.reset_run(seed);
        info!(run, seed, run_name = %run_name(&self.cfg.run.tag), "new run");
        Ok(())
    }

    /// Switches the training patterns and restarts the training environment.
    pub fn set_train_patterns(&mut self, which: TrainSet) -> Result<(), SimError> {
        self.train_env.set_patterns(self.bank.train(which).clone());
        self.train_env.init(0)?;
        info!(set = ?which, patterns = self.train_env.set().len(), "training set switched");
        Ok(())
    }

    /// Advances the training environment by one trial.
    ///
    /// On an epoch boundary the finished epoch is summarized and an
    /// evaluation pass may follow before the first trial of the new epoch
    /// runs. At the epoch limit the run ends instead and no trial runs.
    pub fn step_trial(&mut self) -> Result<Step, SimError> {
        if self.done {
            return Ok(Step::Done);
        }
        let epoch_changed = self.train_env.step();
        let (epoch, prev_epoch, _) = self.train_env.counter(TimeScale::Epoch);
        let (trial, _, _) = self.train_env.counter(TimeScale::Trial);

        if epoch == 0 && trial == 0 && !epoch_changed {
            self.run_evaluation_pass()?;
        }

        if epoch_changed {
            self.finish_train_epoch(prev_epoch);
            let interval = self.cfg.run.test_interval as i64;
            if interval > 0 && epoch % interval == 0 {
                self.run_evaluation_pass()?;
            }
            if epoch >= self.cfg.run.max_epochs as i64 {
                self.run_end()?;
                if self.train_env.counters_mut().run.incr() {
                    self.done = true;
                    self.publish_run_stats();
                    info!(runs = self.state.run_rows.len(), "all runs done");
                    return Ok(Step::Done);
                }
                self.new_run()?;
                return Ok(Step::Run);
            }
        }

        self.run_train_trial()?;
        Ok(if epoch_changed { Step::Epoch } else { Step::Trial })
    }

    /// Runs every evaluation pattern once, in order, without learning.
    ///
    /// Stops early if a stop is requested; the summary then covers only the
    /// trials that ran.
    pub fn run_evaluation_pass(&mut self) -> Result<TestSummary, SimError> {
        let run = self.train_env.counters().run.cur;
        self.test_env.init(run)?;
        let mut acc = TestAccumulator::default();
        loop {
            if self.test_env.step() {
                break;
            }
            let row = self.run_test_trial()?;
            acc.push(&row.stats, &row.recall);
            self.sink.publish(Record::TestTrial(row));
            if self.stop.is_requested() {
                break;
            }
        }
        let summary = acc.finish();
        self.state.test_history.push(summary);
        let epoch = self.train_env.counters().epoch.cur;
        debug!(run, epoch, trials = summary.trials, pct_cor = summary.pct_cor, "evaluation pass");
        self.sink.publish(Record::TestEpoch(TestEpochRow {
            run,
            epoch,
            summary,
        }));
        Ok(summary)
    }

    /// Runs evaluation pattern `index` once. Counters, statistics and the
    /// carried recall flag are left as they were.
    pub fn probe_item(&mut self, index: usize) -> Result<TrialRow, SimError> {
        let len = self.test_env.set().len();
        if index >= len {
            return Err(SimError::ItemOutOfRange {
                env: self.test_env.name().to_string(),
                index,
                len,
            });
        }
        if !self.test_env.is_initialized() {
            self.test_env.init(self.train_env.counters().run.cur)?;
        }
        let saved_counters = *self.test_env.counters();
        let saved_ctl = self.ctl.clone();
        self.test_env.set_trial(index as i64);
        let result = self.run_test_trial();
        self.test_env.restore_counters(saved_counters);
        self.ctl = saved_ctl;
        result
    }

    pub fn stop(&self) {
        self.stop.request();
    }

    /// Steps until all runs are done or a stop is requested.
    pub fn train(&mut self) -> Result<(), SimError> {
        while !self.stop.is_requested() {
            if self.step_trial()? == Step::Done {
                break;
            }
        }
        Ok(())
    }

    /// Steps until the current run ends.
    pub fn train_run(&mut self) -> Result<(), SimError> {
        while !self.stop.is_requested() {
            if matches!(self.step_trial()?, Step::Run | Step::Done) {
                break;
            }
        }
        Ok(())
    }

    /// Steps until the current epoch ends. The step that closes it also runs
    /// the first trial of the next epoch unless the run ended.
    pub fn train_epoch(&mut self) -> Result<(), SimError> {
        while !self.stop.is_requested() {
            if self.step_trial()? != Step::Trial {
                break;
            }
        }
        Ok(())
    }

    /// One-line status of the counters, tab separated.
    pub fn counters(&self, train: bool) -> String {
        let (env, trial) = if train {
            (&self.train_env, self.train_env.counters().trial.cur)
        } else {
            (&self.test_env, self.test_env.counters().trial.cur)
        };
        let Counters { run, epoch, .. } = *self.train_env.counters();
        format!(
            "Run:\t{}\tEpoch:\t{}\tTrial:\t{}\tCycle:\t{}\tName:\t{}",
            run.cur,
            epoch.cur,
            trial,
            self.ctl.time().cycle,
            env.trial_name()
        )
    }

    /// `Net_RunName_RRR_EEEEE.wts` for the current counters.
    pub fn weights_file_name(&self) -> String {
        let c = self.train_env.counters();
        format!(
            "{}_{}_{}.wts",
            self.net.name(),
            run_name(&self.cfg.run.tag),
            run_epoch_name(c.run.cur, c.epoch.cur)
        )
    }

    /// Cross-run description of the finished runs.
    pub fn run_stats(&self) -> RunStats {
        let rows = &self.state.run_rows;
        RunStats {
            runs: rows.len(),
            first_zero: Describe::of(rows.iter().filter_map(|r| r.first_zero.map(|e| e as f64))),
            sse: Describe::of(rows.iter().map(|r| r.sse)),
            avg_sse: Describe::of(rows.iter().map(|r| r.avg_sse)),
            pct_cor: Describe::of(rows.iter().map(|r| r.pct_cor)),
            cos_diff: Describe::of(rows.iter().map(|r| r.cos_diff)),
            mem_pct: Describe::of(rows.iter().filter_map(|r| r.mem_pct)),
        }
    }

    fn run_train_trial(&mut self) -> Result<(), SimError> {
        apply_inputs(&mut self.net, &self.train_env, self.input, self.target, &self.cfg.network)?;
        let key = self.trial_key(true);
        let recall = self.ctl.run_trial(&mut self.net, true, &key, &mut self.sink)?;
        let stats = self.ctl.trial_stats(&self.net);
        self.state.epoch.accumulate_trial(&stats);
        self.state.recall.push(&recall, true);
        self.sink.publish(Record::TrainTrial(TrialRow { key, stats, recall }));
        Ok(())
    }

    fn run_test_trial(&mut self) -> Result<TrialRow, SimError> {
        apply_inputs(&mut self.net, &self.test_env, self.input, self.target, &self.cfg.network)?;
        let key = self.trial_key(false);
        let recall = self.ctl.run_trial(&mut self.net, false, &key, &mut self.sink)?;
        let stats = self.ctl.trial_stats(&self.net);
        Ok(TrialRow { key, stats, recall })
    }

    fn trial_key(&self, train: bool) -> TrialKey {
        let c = self.train_env.counters();
        let env = if train { &self.train_env } else { &self.test_env };
        TrialKey {
            run: c.run.cur,
            epoch: c.epoch.cur,
            trial: env.counters().trial.cur,
            trial_name: env.trial_name().to_string(),
            train,
        }
    }

    fn finish_train_epoch(&mut self, epoch: i64) {
        let summary = self.state.epoch.finalize(self.train_env.trials_per_epoch());
        let recall = self.state.recall.take();
        if self
            .state
            .first_zero
            .record(epoch.max(0) as usize, summary.pct_err)
        {
            info!(epoch, "first epoch without training errors");
        }
        let layer_act = self
            .ctl
            .handles()
            .stat_layers
            .iter()
            .map(|&id| (self.net.layer_name(id).to_string(), self.net.layer_act_avg(id)))
            .collect();
        self.sink.publish(Record::TrainEpoch(TrainEpochRow {
            run: self.train_env.counters().run.cur,
            epoch,
            summary,
            recall,
            first_zero: self.state.first_zero.get(),
            layer_act,
        }));
    }

    fn run_end(&mut self) -> Result<(), SimError> {
        let run = self.train_env.counters().run.cur;
        let row = self.run_row(run);
        info!(
            run,
            first_zero = ?row.first_zero,
            pct_cor = row.pct_cor,
            mem_pct = ?row.mem_pct,
            "run finished"
        );
        self.state.run_rows.push(row.clone());
        self.sink.publish(Record::Run(row));

        if self.cfg.run.save_weights {
            let dir = &self.cfg.run.weights_dir;
            fs::create_dir_all(dir).map_err(|source| SimError::WeightsDir {
                path: dir.clone(),
                source,
            })?;
            let path = dir.join(self.weights_file_name());
            self.net.save_weights(&path)?;
            info!(path = %path.display(), "saved weights");
        }
        Ok(())
    }

    /// Means over the last `run_stats_window` evaluation passes.
    fn run_row(&self, run: i64) -> RunRow {
        let history = &self.state.test_history;
        let window = self.cfg.run.run_stats_window.min(history.len());
        let recent = &history[history.len() - window..];
        let n = window.max(1) as f64;
        let mean = |f: fn(&TestSummary) -> f64| recent.iter().map(f).sum::<f64>() / n;
        let opt_mean = |f: fn(&TestSummary) -> Option<f64>| {
            let mut m = OptMean::default();
            for s in recent {
                m.push(f(s));
            }
            m.mean()
        };
        RunRow {
            run,
            run_name: run_name(&self.cfg.run.tag),
            first_zero: self.state.first_zero.get(),
            window,
            sse: mean(|s| s.sse),
            avg_sse: mean(|s| s.avg_sse),
            pct_err: mean(|s| s.pct_err),
            pct_cor: mean(|s| s.pct_cor),
            cos_diff: mean(|s| s.cos_diff),
            mem_pct: opt_mean(|s| s.recall.mem_pct),
            trg_on_was_off: opt_mean(|s| s.recall.trg_on_was_off),
            trg_off_was_on: opt_mean(|s| s.recall.trg_off_was_on),
        }
    }

    fn publish_run_stats(&mut self) {
        let stats = self.run_stats();
        self.sink.publish(Record::RunStats(stats));
    }
}

/// Clears external input and applies the current trial's cue and target.
fn apply_inputs<N: Network + ?Sized>(
    net: &mut N,
    env: &PatternEnv,
    input: LayerId,
    target: LayerId,
    names: &NetworkConfig,
) -> Result<(), SimError> {
    net.init_ext();
    for (id, name) in [(input, names.input.as_str()), (target, names.ec_out.as_str())] {
        let values = env.state(name).ok_or_else(|| SimError::MissingInput {
            env: env.name().to_string(),
            row: env.trial_name().to_string(),
            layer: name.to_string(),
        })?;
        net.apply_ext(id, values)?;
    }
    Ok(())
}
