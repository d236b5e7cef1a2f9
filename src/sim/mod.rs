//! Trial scheduling, recall scoring and run bookkeeping.

pub mod alpha;
pub mod env;
pub mod gain;
pub mod recall;
pub mod scheduler;
pub mod sink;
pub mod stats;

use thiserror::Error;

use crate::net::NetError;
use env::PatternError;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Net(#[from] NetError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("environment `{0}` has no patterns")]
    EmptyPatterns(String),
    #[error("pattern `{row}` in `{env}` has no input for layer `{layer}`")]
    MissingInput {
        env: String,
        row: String,
        layer: String,
    },
    #[error("item {index} out of range for `{env}` ({len} patterns)")]
    ItemOutOfRange {
        env: String,
        index: usize,
        len: usize,
    },
    #[error("failed to create weights directory {path}: {source}")]
    WeightsDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub use alpha::AlphaCycleController;
pub use scheduler::{Sim, SimConfig, Step, StopHandle};
