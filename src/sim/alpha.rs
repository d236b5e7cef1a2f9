use tracing::trace;

use super::SimError;
use super::gain::{GainPair, gain_at_quarter_end, gain_for_quarter};
use super::recall::{RecallOutcome, RecallScorer};
use super::sink::{ActivitySnapshot, InstrumentSink, LayerSnapshot, Record, SnapshotScale, TrialKey};
use super::stats::TrialStats;
use crate::core::timebase::{AlphaTime, CYCLES_PER_QUARTER, QUARTERS};
use crate::net::{CircuitHandles, LayerMode, Network, UnitVar};

/// Per-unit error below this magnitude does not count toward SSE.
pub const SSE_TOLERANCE: f32 = 0.5;

/// Runs one trial as four quarters of 25 cycles.
///
/// During training the CA1 afferents alternate between the ECin and CA3
/// pathways (see [`super::gain`]); at the end of the third quarter the ECin
/// activity is copied onto ECout as its plus-phase drive. Recall is scored
/// right after the third quarter is finalized, on the minus-phase readout.
#[derive(Clone, Debug)]
pub struct AlphaCycleController {
    handles: CircuitHandles,
    scorer: RecallScorer,
    time: AlphaTime,
    snapshot_scale: SnapshotScale,
    cmp: Vec<f32>,
    trg: Vec<f32>,
    drv: Vec<f32>,
    carry: Vec<f32>,
}

impl AlphaCycleController {
    pub fn new(handles: CircuitHandles, mem_threshold: f64, snapshot_scale: SnapshotScale) -> Self {
        Self {
            handles,
            scorer: RecallScorer::new(mem_threshold),
            time: AlphaTime::default(),
            snapshot_scale,
            cmp: Vec::new(),
            trg: Vec::new(),
            drv: Vec::new(),
            carry: Vec::new(),
        }
    }

    pub fn handles(&self) -> &CircuitHandles {
        &self.handles
    }

    pub fn time(&self) -> &AlphaTime {
        &self.time
    }

    pub fn scorer(&self) -> &RecallScorer {
        &self.scorer
    }

    /// New run: zero the cycle total and forget the carried hit flag.
    pub fn reset(&mut self) {
        self.time.reset();
        self.scorer.reset();
    }

    pub fn set_snapshot_scale(&mut self, scale: SnapshotScale) {
        self.snapshot_scale = scale;
    }

    /// Runs one alpha cycle. External inputs for the trial must already be
    /// applied.
    pub fn run_trial<N, S>(
        &mut self,
        net: &mut N,
        train: bool,
        key: &TrialKey,
        sink: &mut S,
    ) -> Result<RecallOutcome, SimError>
    where
        N: Network + ?Sized,
        S: InstrumentSink + ?Sized,
    {
        if train {
            net.apply_dwt();
        }
        let mode = if train {
            LayerMode::Target
        } else {
            LayerMode::CompareOnly
        };
        net.set_layer_mode(self.handles.ec_out, mode);
        if let Some(gains) = gain_for_quarter(0, train) {
            self.set_gains(net, gains);
        }
        net.alpha_cycle_init();
        self.time.alpha_cyc_start();

        let snapshots = sink.wants_snapshots() && self.snapshot_scale != SnapshotScale::None;
        let mut outcome = RecallOutcome::default();
        for quarter in 0..QUARTERS {
            for _ in 0..CYCLES_PER_QUARTER {
                net.cycle(&self.time);
                if snapshots && self.snapshot_scale == SnapshotScale::Cycle {
                    self.publish_snapshot(net, key, sink);
                }
                self.time.cycle_inc();
            }

            if let Some(gains) = gain_at_quarter_end(quarter, train) {
                self.set_gains(net, gains);
                net.rescale_inputs();
                net.init_g_inc();
                if quarter == 2 {
                    net.unit_values(self.handles.ec_in, UnitVar::Act, &mut self.carry);
                    net.apply_ext(self.handles.ec_out, &self.carry)?;
                }
            }
            net.quarter_final(&self.time);
            trace!(quarter, cycle_tot = self.time.cycle_tot, train, "quarter done");
            if snapshots && self.snapshot_scale == SnapshotScale::Quarter {
                self.publish_snapshot(net, key, sink);
            }
            if quarter == 2 {
                outcome = self.score(net, train);
            }
            self.time.quarter_inc();
        }

        if train {
            net.compute_dwt();
        }
        if snapshots && self.snapshot_scale == SnapshotScale::Trial {
            self.publish_snapshot(net, key, sink);
        }
        Ok(outcome)
    }

    /// SSE and cosine difference of the readout after a finished trial.
    pub fn trial_stats<N: Network + ?Sized>(&self, net: &N) -> TrialStats {
        let (sse, avg_sse) = net.layer_mse(self.handles.ec_out, SSE_TOLERANCE);
        TrialStats {
            sse,
            avg_sse,
            cos_diff: net.layer_cos_diff(self.handles.ec_out),
        }
    }

    fn set_gains<N: Network + ?Sized>(&self, net: &mut N, gains: GainPair) {
        net.set_pathway_scale(self.handles.direct, gains.direct);
        net.set_pathway_scale(self.handles.recurrent, gains.recurrent);
    }

    fn score<N: Network + ?Sized>(&mut self, net: &N, train: bool) -> RecallOutcome {
        net.unit_values(self.handles.ec_out, UnitVar::ActM, &mut self.cmp);
        net.unit_values(self.handles.ec_out, UnitVar::Targ, &mut self.trg);
        net.unit_values(self.handles.ec_in, UnitVar::ActQ1, &mut self.drv);
        self.scorer.score(train, &self.cmp, &self.trg, &self.drv)
    }

    fn publish_snapshot<N, S>(&self, net: &N, key: &TrialKey, sink: &mut S)
    where
        N: Network + ?Sized,
        S: InstrumentSink + ?Sized,
    {
        let layers = self
            .handles
            .snapshot_layers
            .iter()
            .map(|&id| {
                let mut act = Vec::with_capacity(net.layer_len(id));
                net.unit_values(id, UnitVar::Act, &mut act);
                LayerSnapshot {
                    layer: net.layer_name(id).to_string(),
                    act,
                }
            })
            .collect();
        sink.publish(Record::Snapshot(ActivitySnapshot {
            key: key.clone(),
            cycle: self.time.cycle,
            quarter: self.time.quarter,
            layers,
        }));
    }
}
