//! Instrumentation hook points.
//!
//! The trial loop publishes owned [`Record`]s; what happens to them (kept in
//! memory, forwarded to another thread, logged) is up to the sink. Nothing a
//! sink does feeds back into scheduling or scoring.

use crossbeam_channel::{Receiver, Select, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::recall::RecallOutcome;
use super::stats::{Describe, EpochSummary, RecallSummary, TestSummary, TrialStats};

/// How often activation snapshots are taken inside a trial.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotScale {
    #[default]
    None,
    Cycle,
    Quarter,
    Trial,
}

/// Position of a record in the Run / Epoch / Trial hierarchy.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrialKey {
    pub run: i64,
    pub epoch: i64,
    pub trial: i64,
    pub trial_name: String,
    pub train: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LayerSnapshot {
    pub layer: String,
    pub act: Vec<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActivitySnapshot {
    pub key: TrialKey,
    pub cycle: usize,
    pub quarter: usize,
    pub layers: Vec<LayerSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrialRow {
    pub key: TrialKey,
    pub stats: TrialStats,
    pub recall: RecallOutcome,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrainEpochRow {
    pub run: i64,
    pub epoch: i64,
    pub summary: EpochSummary,
    pub recall: RecallSummary,
    pub first_zero: Option<usize>,
    /// Mean activation of each stat layer on the last trial of the epoch.
    pub layer_act: Vec<(String, f32)>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TestEpochRow {
    pub run: i64,
    /// Training epochs completed when the pass ran: 0 for the baseline pass,
    /// otherwise one past the epoch whose boundary triggered it.
    pub epoch: i64,
    pub summary: TestSummary,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunRow {
    pub run: i64,
    pub run_name: String,
    pub first_zero: Option<usize>,
    /// Number of evaluation passes averaged below.
    pub window: usize,
    pub sse: f64,
    pub avg_sse: f64,
    pub pct_err: f64,
    pub pct_cor: f64,
    pub cos_diff: f64,
    pub mem_pct: Option<f64>,
    pub trg_on_was_off: Option<f64>,
    pub trg_off_was_on: Option<f64>,
}

/// Cross-run description of the run rows collected so far.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub runs: usize,
    pub first_zero: Option<Describe>,
    pub sse: Option<Describe>,
    pub avg_sse: Option<Describe>,
    pub pct_cor: Option<Describe>,
    pub cos_diff: Option<Describe>,
    pub mem_pct: Option<Describe>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Snapshot(ActivitySnapshot),
    TrainTrial(TrialRow),
    TestTrial(TrialRow),
    TrainEpoch(TrainEpochRow),
    TestEpoch(TestEpochRow),
    Run(RunRow),
    RunStats(RunStats),
}

pub trait InstrumentSink {
    fn publish(&mut self, record: Record);

    /// Whether activation snapshots are worth copying out of the network.
    fn wants_snapshots(&self) -> bool {
        true
    }
}

impl<S: InstrumentSink + ?Sized> InstrumentSink for &mut S {
    fn publish(&mut self, record: Record) {
        (**self).publish(record);
    }

    fn wants_snapshots(&self) -> bool {
        (**self).wants_snapshots()
    }
}

impl<S: InstrumentSink + ?Sized> InstrumentSink for Box<S> {
    fn publish(&mut self, record: Record) {
        (**self).publish(record);
    }

    fn wants_snapshots(&self) -> bool {
        (**self).wants_snapshots()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl InstrumentSink for NullSink {
    fn publish(&mut self, _record: Record) {}

    fn wants_snapshots(&self) -> bool {
        false
    }
}

/// Keeps every record. Used by tests and short batch runs.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    pub records: Vec<Record>,
    pub snapshots: bool,
}

impl MemorySink {
    pub fn with_snapshots() -> Self {
        Self {
            records: Vec::new(),
            snapshots: true,
        }
    }

    pub fn train_trials(&self) -> impl Iterator<Item = &TrialRow> {
        self.records.iter().filter_map(|r| match r {
            Record::TrainTrial(row) => Some(row),
            _ => None,
        })
    }

    pub fn test_trials(&self) -> impl Iterator<Item = &TrialRow> {
        self.records.iter().filter_map(|r| match r {
            Record::TestTrial(row) => Some(row),
            _ => None,
        })
    }

    pub fn train_epochs(&self) -> impl Iterator<Item = &TrainEpochRow> {
        self.records.iter().filter_map(|r| match r {
            Record::TrainEpoch(row) => Some(row),
            _ => None,
        })
    }

    pub fn test_epochs(&self) -> impl Iterator<Item = &TestEpochRow> {
        self.records.iter().filter_map(|r| match r {
            Record::TestEpoch(row) => Some(row),
            _ => None,
        })
    }

    pub fn runs(&self) -> impl Iterator<Item = &RunRow> {
        self.records.iter().filter_map(|r| match r {
            Record::Run(row) => Some(row),
            _ => None,
        })
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &ActivitySnapshot> {
        self.records.iter().filter_map(|r| match r {
            Record::Snapshot(s) => Some(s),
            _ => None,
        })
    }
}

impl InstrumentSink for MemorySink {
    fn publish(&mut self, record: Record) {
        self.records.push(record);
    }

    fn wants_snapshots(&self) -> bool {
        self.snapshots
    }
}

/// Forwards records to an observer thread without ever blocking the trial loop.
///
/// Rows travel over an unbounded channel and are never lost. Snapshots go
/// through a bounded channel with `try_send`; those that do not fit are
/// dropped and counted.
#[derive(Debug)]
pub struct ChannelSink {
    rows: Sender<Record>,
    snapshot_tx: Sender<Record>,
    snapshots: bool,
    dropped: u64,
    disconnected: bool,
}

/// A connected sink and receiver; `capacity` bounds the snapshot queue.
pub fn channel(capacity: usize, snapshots: bool) -> (ChannelSink, RecordReceiver) {
    let (rows_tx, rows_rx) = crossbeam_channel::unbounded();
    let (snap_tx, snap_rx) = crossbeam_channel::bounded(capacity.max(1));
    (
        ChannelSink::new(rows_tx, snap_tx, snapshots),
        RecordReceiver::new(rows_rx, snap_rx),
    )
}

impl ChannelSink {
    pub fn new(rows: Sender<Record>, snapshot_tx: Sender<Record>, snapshots: bool) -> Self {
        Self {
            rows,
            snapshot_tx,
            snapshots,
            dropped: 0,
            disconnected: false,
        }
    }

    /// Snapshots dropped because the observer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn close(&mut self) {
        if !self.disconnected {
            warn!("observer channel closed; further records are discarded");
            self.disconnected = true;
        }
    }
}

impl InstrumentSink for ChannelSink {
    fn publish(&mut self, record: Record) {
        if self.disconnected {
            return;
        }
        if !matches!(record, Record::Snapshot(_)) {
            if self.rows.send(record).is_err() {
                self.close();
            }
            return;
        }
        match self.snapshot_tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped.is_power_of_two() {
                    warn!(dropped = self.dropped, "observer channel full; dropping snapshots");
                }
            }
            Err(TrySendError::Disconnected(_)) => self.close(),
        }
    }

    fn wants_snapshots(&self) -> bool {
        self.snapshots && !self.disconnected
    }
}

/// Observer side of [`channel`]. Iterates until the sink is dropped and both
/// queues are drained.
#[derive(Debug)]
pub struct RecordReceiver {
    rows: Receiver<Record>,
    snapshots: Receiver<Record>,
    rows_open: bool,
    snapshots_open: bool,
}

impl RecordReceiver {
    pub fn new(rows: Receiver<Record>, snapshots: Receiver<Record>) -> Self {
        Self {
            rows,
            snapshots,
            rows_open: true,
            snapshots_open: true,
        }
    }
}

impl Iterator for RecordReceiver {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        while self.rows_open || self.snapshots_open {
            let mut sel = Select::new();
            let rows_idx = self.rows_open.then(|| sel.recv(&self.rows));
            if self.snapshots_open {
                sel.recv(&self.snapshots);
            }
            let op = sel.select();
            if Some(op.index()) == rows_idx {
                match op.recv(&self.rows) {
                    Ok(record) => return Some(record),
                    Err(_) => self.rows_open = false,
                }
            } else {
                match op.recv(&self.snapshots) {
                    Ok(record) => return Some(record),
                    Err(_) => self.snapshots_open = false,
                }
            }
        }
        None
    }
}

/// Logs rows through `tracing`: epochs and runs at info, trials at debug.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn log(record: &Record) {
        match record {
            Record::Snapshot(s) => trace!(
                run = s.key.run,
                epoch = s.key.epoch,
                trial = s.key.trial,
                cycle = s.cycle,
                layers = s.layers.len(),
                "snapshot"
            ),
            Record::TrainTrial(row) | Record::TestTrial(row) => debug!(
                run = row.key.run,
                epoch = row.key.epoch,
                trial = row.key.trial,
                name = %row.key.trial_name,
                train = row.key.train,
                sse = row.stats.sse,
                cos_diff = row.stats.cos_diff,
                is_hit = row.recall.is_hit,
                "trial"
            ),
            Record::TrainEpoch(row) => info!(
                run = row.run,
                epoch = row.epoch,
                sse = row.summary.sse,
                pct_err = row.summary.pct_err,
                cos_diff = row.summary.cos_diff,
                mem_pct = ?row.recall.mem_pct,
                first_zero = ?row.first_zero,
                "train epoch"
            ),
            Record::TestEpoch(row) => info!(
                run = row.run,
                epoch = row.epoch,
                trials = row.summary.trials,
                sse = row.summary.sse,
                pct_cor = row.summary.pct_cor,
                mem_pct = ?row.summary.recall.mem_pct,
                "test epoch"
            ),
            Record::Run(row) => info!(
                run = row.run,
                name = %row.run_name,
                first_zero = ?row.first_zero,
                pct_cor = row.pct_cor,
                mem_pct = ?row.mem_pct,
                "run done"
            ),
            Record::RunStats(stats) => info!(
                runs = stats.runs,
                first_zero = ?stats.first_zero.map(|d| d.mean),
                pct_cor = ?stats.pct_cor.map(|d| d.mean),
                mem_pct = ?stats.mem_pct.map(|d| d.mean),
                "run stats"
            ),
        }
    }
}

impl InstrumentSink for TracingSink {
    fn publish(&mut self, record: Record) {
        Self::log(&record);
    }

    fn wants_snapshots(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(run: i64) -> Record {
        Record::Run(RunRow {
            run,
            run_name: "Base".to_string(),
            first_zero: None,
            window: 2,
            sse: 0.0,
            avg_sse: 0.0,
            pct_err: 0.0,
            pct_cor: 1.0,
            cos_diff: 1.0,
            mem_pct: None,
            trg_on_was_off: None,
            trg_off_was_on: None,
        })
    }

    fn snapshot(cycle: usize) -> Record {
        Record::Snapshot(ActivitySnapshot {
            key: TrialKey::default(),
            cycle,
            quarter: cycle / 25,
            layers: Vec::new(),
        })
    }

    #[test]
    fn channel_sink_drops_only_snapshots_when_full() {
        let (rows_tx, rows_rx) = crossbeam_channel::unbounded();
        let (snap_tx, snap_rx) = crossbeam_channel::bounded(2);
        let mut sink = ChannelSink::new(rows_tx, snap_tx, true);
        for cycle in 0..5 {
            sink.publish(snapshot(cycle));
        }
        sink.publish(row(0));
        sink.publish(row(1));

        assert_eq!(sink.dropped(), 3);
        assert_eq!(snap_rx.try_iter().count(), 2);
        let runs: Vec<i64> = rows_rx
            .try_iter()
            .filter_map(|r| match r {
                Record::Run(row) => Some(row.run),
                _ => None,
            })
            .collect();
        assert_eq!(runs, vec![0, 1]);
    }

    #[test]
    fn receiver_drains_both_queues_then_ends() {
        let (mut sink, rx) = channel(1, true);
        sink.publish(snapshot(0));
        sink.publish(snapshot(1));
        for run in 0..3 {
            sink.publish(row(run));
        }
        drop(sink);

        let records: Vec<Record> = rx.collect();
        assert_eq!(records.len(), 4);
        let runs: Vec<i64> = records
            .iter()
            .filter_map(|r| match r {
                Record::Run(row) => Some(row.run),
                _ => None,
            })
            .collect();
        assert_eq!(runs, vec![0, 1, 2]);
    }

    #[test]
    fn channel_sink_stops_after_disconnect() {
        let (mut sink, rx) = channel(1, true);
        drop(rx);
        sink.publish(row(0));
        assert!(!sink.wants_snapshots());
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn memory_sink_filters_by_kind() {
        let mut sink = MemorySink::default();
        sink.publish(row(0));
        sink.publish(row(1));
        assert_eq!(sink.runs().count(), 2);
        assert_eq!(sink.train_trials().count(), 0);
    }

    #[test]
    fn records_serialize_with_kind_tag() {
        let json = serde_json::to_string(&row(3)).unwrap();
        assert!(json.contains("\"kind\":\"run\""));
        assert!(json.contains("\"run\":3"));
    }
}
