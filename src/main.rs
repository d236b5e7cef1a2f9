// Entry point: runs the trainer on a worker thread and logs its records.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use clap::Parser;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hippo_recall::cli::Args;
use hippo_recall::config::AppConfig;
use hippo_recall::net::hebbian::{HebbianNet, HipShape};
use hippo_recall::sim::env::{PatternBank, PatternError};
use hippo_recall::sim::sink::{self, Record, SnapshotScale, TracingSink};
use hippo_recall::sim::{Sim, SimConfig, SimError, StopHandle};

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Sim(#[from] SimError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to set Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("failed to spawn trainer thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("trainer thread panicked")]
    Panicked,
}

/// Items per generated pattern bank, each with `ACTIVE` of 8 units on.
const ITEMS: usize = 8;
const ACTIVE: usize = 3;
/// Repetitions of each item in the statistical training set (8 × 10 = 80 trials).
const REPS: usize = 10;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), AppError> {
    let mut cfg = AppConfig::load_or_default(&args.config);
    args.apply(&mut cfg);

    let shape = HipShape::default();
    let bank = match &args.patterns {
        Some(path) => PatternBank::load(path)?,
        None => PatternBank::generate(
            shape.ec,
            ITEMS,
            ACTIVE,
            REPS,
            &cfg.network.input,
            &cfg.network.ec_out,
            cfg.run.seed.unwrap_or(1),
        ),
    };
    if let Some(path) = &args.write_patterns {
        let text = serde_json::to_string_pretty(&bank)?;
        std::fs::write(path, text).map_err(|source| AppError::Output {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "pattern bank written");
        return Ok(());
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_for_ctrlc = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_for_ctrlc.store(true, Ordering::SeqCst);
    })?;

    let snapshots = cfg.instrument.snapshot_scale != SnapshotScale::None;
    let (record_sink, rx) = sink::channel(cfg.instrument.channel_capacity, snapshots);
    let sim_cfg = SimConfig::from(&cfg);
    let net_seed = cfg.run.seed.unwrap_or(0);

    let trainer = thread::Builder::new()
        .name("trainer".into())
        .spawn(move || -> Result<u64, SimError> {
            let net = HebbianNet::hip(shape, net_seed);
            let mut sim = Sim::new(sim_cfg, net, bank, record_sink)?
                .with_stop_handle(StopHandle::from_flag(stop_flag));
            info!(base_seed = sim.base_seed(), "trainer started");
            sim.init()?;
            sim.train()?;
            if !sim.is_done() {
                info!(status = %sim.counters(true), "stopped");
            }
            Ok(sim.sink().dropped())
        })
        .map_err(AppError::Spawn)?;

    let mut writer = match &args.records {
        Some(path) => {
            let file = File::create(path).map_err(|source| AppError::Output {
                path: path.clone(),
                source,
            })?;
            Some((path.clone(), BufWriter::new(file)))
        }
        None => None,
    };
    for record in rx {
        if !matches!(record, Record::Snapshot(_)) {
            TracingSink::log(&record);
        }
        if let Some((path, out)) = writer.as_mut() {
            let line = serde_json::to_string(&record)?;
            writeln!(out, "{line}").map_err(|source| AppError::Output {
                path: path.clone(),
                source,
            })?;
        }
    }
    if let Some((path, mut out)) = writer {
        out.flush().map_err(|source| AppError::Output { path, source })?;
    }

    let dropped = trainer.join().map_err(|_| AppError::Panicked)??;
    if dropped > 0 {
        warn!(dropped, "observer fell behind; some snapshots were not delivered");
    }
    Ok(())
}
