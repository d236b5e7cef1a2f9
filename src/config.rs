use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::sim::env::TrainSet;
use crate::sim::recall::DEFAULT_MEM_THRESHOLD;
use crate::sim::sink::SnapshotScale;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    #[serde(default = "RunConfig::default_max_runs")]
    pub max_runs: usize,
    #[serde(default = "RunConfig::default_max_epochs")]
    pub max_epochs: usize,
    /// Training trials per epoch; 0 uses the number of training patterns.
    #[serde(default)]
    pub trials_per_epoch: usize,
    /// Evaluation pass every this many epochs; 0 disables periodic passes.
    #[serde(default = "RunConfig::default_test_interval")]
    pub test_interval: usize,
    #[serde(default = "RunConfig::default_mem_threshold")]
    pub mem_threshold: f64,
    /// Base seed; each run derives its own. Absent means fresh entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub save_weights: bool,
    #[serde(default = "RunConfig::default_weights_dir")]
    pub weights_dir: PathBuf,
    /// Evaluation passes averaged into each run row.
    #[serde(default = "RunConfig::default_run_stats_window")]
    pub run_stats_window: usize,
    /// Present training patterns in a fresh random order every epoch.
    #[serde(default = "RunConfig::default_permute")]
    pub permute: bool,
    #[serde(default)]
    pub train_set: TrainSet,
}

impl RunConfig {
    fn default_max_runs() -> usize {
        10
    }
    fn default_max_epochs() -> usize {
        10
    }
    fn default_test_interval() -> usize {
        1
    }
    fn default_mem_threshold() -> f64 {
        DEFAULT_MEM_THRESHOLD
    }
    fn default_weights_dir() -> PathBuf {
        PathBuf::from("wts")
    }
    fn default_run_stats_window() -> usize {
        2
    }
    fn default_permute() -> bool {
        true
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_runs: Self::default_max_runs(),
            max_epochs: Self::default_max_epochs(),
            trials_per_epoch: 0,
            test_interval: Self::default_test_interval(),
            mem_threshold: Self::default_mem_threshold(),
            seed: None,
            tag: String::new(),
            save_weights: false,
            weights_dir: Self::default_weights_dir(),
            run_stats_window: Self::default_run_stats_window(),
            permute: Self::default_permute(),
            train_set: TrainSet::default(),
        }
    }
}

/// Names of the layers the trial loop addresses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "NetworkConfig::default_input")]
    pub input: String,
    #[serde(default = "NetworkConfig::default_ec_in")]
    pub ec_in: String,
    #[serde(default = "NetworkConfig::default_ec_out")]
    pub ec_out: String,
    #[serde(default = "NetworkConfig::default_ca1")]
    pub ca1: String,
    #[serde(default = "NetworkConfig::default_ca3")]
    pub ca3: String,
    /// Layers whose mean activity is reported on training epoch rows.
    #[serde(default = "NetworkConfig::default_stat_layers")]
    pub stat_layers: Vec<String>,
}

impl NetworkConfig {
    fn default_input() -> String {
        "Input".to_string()
    }
    fn default_ec_in() -> String {
        "ECin".to_string()
    }
    fn default_ec_out() -> String {
        "ECout".to_string()
    }
    fn default_ca1() -> String {
        "CA1".to_string()
    }
    fn default_ca3() -> String {
        "CA3".to_string()
    }
    fn default_stat_layers() -> Vec<String> {
        ["ECin", "DG", "CA3", "CA1"]
            .into_iter()
            .map(String::from)
            .collect()
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input: Self::default_input(),
            ec_in: Self::default_ec_in(),
            ec_out: Self::default_ec_out(),
            ca1: Self::default_ca1(),
            ca3: Self::default_ca3(),
            stat_layers: Self::default_stat_layers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstrumentConfig {
    #[serde(default)]
    pub snapshot_scale: SnapshotScale,
    #[serde(default = "InstrumentConfig::default_snapshot_layers")]
    pub snapshot_layers: Vec<String>,
    /// Snapshots queued for the observer before new ones are dropped.
    #[serde(default = "InstrumentConfig::default_channel_capacity")]
    pub channel_capacity: usize,
}

impl InstrumentConfig {
    fn default_snapshot_layers() -> Vec<String> {
        ["ECin", "CA3", "CA1", "ECout"]
            .into_iter()
            .map(String::from)
            .collect()
    }
    fn default_channel_capacity() -> usize {
        1024
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            snapshot_scale: SnapshotScale::default(),
            snapshot_layers: Self::default_snapshot_layers(),
            channel_capacity: Self::default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub instrument: InstrumentConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads `path`, falling back to defaults on any error. A missing file is
    /// created with every default value written as a comment.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            return match Self::load(path) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("{err}. Using defaults.");
                    Self::default()
                }
            };
        }

        let default_cfg = Self::default();
        match toml::to_string_pretty(&default_cfg) {
            Ok(text) => {
                if let Err(err) = fs::write(path, commented(&text)) {
                    warn!(path = %path.display(), "failed to write default config: {err}");
                }
            }
            Err(err) => warn!("failed to serialize default config: {err}; continuing with defaults"),
        }
        default_cfg
    }
}

/// Comments out every key, leaving section headers live.
fn commented(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 64);
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            out.push('\n');
        } else if trimmed.starts_with('[') && trimmed.ends_with(']') {
            out.push_str(line);
            out.push('\n');
        } else {
            out.push_str("# ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
