use std::path::PathBuf;

use clap::Parser;

use crate::config::AppConfig;
use crate::sim::env::TrainSet;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Path to config TOML (written with commented defaults if missing)
    #[arg(long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Pattern bank JSON; a seeded bank is generated when omitted
    #[arg(long, value_name = "PATH")]
    pub patterns: Option<PathBuf>,

    /// Write the pattern bank in use to this path and exit
    #[arg(long, value_name = "PATH")]
    pub write_patterns: Option<PathBuf>,

    /// Number of runs (overrides config)
    #[arg(long)]
    pub runs: Option<usize>,

    /// Epochs per run (overrides config)
    #[arg(long)]
    pub epochs: Option<usize>,

    /// Save final weights after each run
    #[arg(long, default_value_t = false)]
    pub wts: bool,

    /// Extra tag added to run and file names
    #[arg(long)]
    pub tag: Option<String>,

    /// Base random seed (overrides config)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Train on the episodic set instead of the statistical one
    #[arg(long, default_value_t = false)]
    pub episodic: bool,

    /// Append every record as a JSON line to this file
    #[arg(long, value_name = "PATH")]
    pub records: Option<PathBuf>,
}

impl Args {
    /// Folds command-line overrides into `cfg`.
    pub fn apply(&self, cfg: &mut AppConfig) {
        if let Some(runs) = self.runs {
            cfg.run.max_runs = runs;
        }
        if let Some(epochs) = self.epochs {
            cfg.run.max_epochs = epochs;
        }
        if self.wts {
            cfg.run.save_weights = true;
        }
        if let Some(tag) = &self.tag {
            cfg.run.tag = tag.clone();
        }
        if self.seed.is_some() {
            cfg.run.seed = self.seed;
        }
        if self.episodic {
            cfg.run.train_set = TrainSet::Episodic;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_on_top_of_config() {
        let args = Args::parse_from([
            "hippo-recall",
            "--runs",
            "3",
            "--epochs",
            "7",
            "--wts",
            "--tag",
            "pilot",
            "--seed",
            "12",
            "--episodic",
        ]);
        let mut cfg = AppConfig::default();
        args.apply(&mut cfg);
        assert_eq!(cfg.run.max_runs, 3);
        assert_eq!(cfg.run.max_epochs, 7);
        assert!(cfg.run.save_weights);
        assert_eq!(cfg.run.tag, "pilot");
        assert_eq!(cfg.run.seed, Some(12));
        assert_eq!(cfg.run.train_set, TrainSet::Episodic);
    }

    #[test]
    fn no_flags_keep_config() {
        let args = Args::parse_from(["hippo-recall"]);
        let mut cfg = AppConfig::default();
        cfg.run.seed = Some(5);
        args.apply(&mut cfg);
        assert_eq!(cfg, {
            let mut d = AppConfig::default();
            d.run.seed = Some(5);
            d
        });
        assert_eq!(args.config, PathBuf::from("config.toml"));
    }
}
