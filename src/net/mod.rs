//! Network collaborator seam.
//!
//! The trial controller never touches activation or learning rules directly;
//! it drives a [`Network`] through this trait. Layers and pathways are looked
//! up by name once, at configuration time, into a [`CircuitHandles`] table.

pub mod hebbian;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::NetworkConfig;
use crate::core::timebase::AlphaTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathwayId(pub usize);

/// Per-unit variables readable from a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitVar {
    /// Current activation.
    Act,
    /// Activation at the end of the minus phase (third quarter).
    ActM,
    /// Activation at the end of the plus phase (fourth quarter).
    ActP,
    /// Activation at the end of the first quarter.
    ActQ1,
    /// Target value applied from outside.
    Targ,
}

/// Role of an output-like layer during a trial.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerMode {
    /// External values are clamped in the plus phase and drive error-driven learning.
    Target,
    /// External values are only compared against; the layer runs free.
    CompareOnly,
}

#[derive(Debug, Error)]
pub enum NetError {
    #[error("unknown layer `{0}`")]
    UnknownLayer(String),
    #[error("no pathway from `{send}` to `{recv}`")]
    UnknownPathway { send: String, recv: String },
    #[error("layer `{layer}` has {expected} units, got {got} values")]
    SizeMismatch {
        layer: String,
        expected: usize,
        got: usize,
    },
    #[error("failed to write weights to {path}: {source}")]
    WeightsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode weights: {0}")]
    WeightsEncode(#[from] serde_json::Error),
}

/// Everything the trial loop needs from the underlying simulator.
pub trait Network {
    fn name(&self) -> &str;

    fn layer_id(&self, name: &str) -> Option<LayerId>;
    fn layer_name(&self, layer: LayerId) -> &str;
    fn layer_len(&self, layer: LayerId) -> usize;
    fn pathway_id(&self, send: LayerId, recv: LayerId) -> Option<PathwayId>;

    /// Copies one variable for every unit of `layer` into `out`.
    fn unit_values(&self, layer: LayerId, var: UnitVar, out: &mut Vec<f32>);
    /// Mean plus-phase activation of the layer.
    fn layer_act_avg(&self, layer: LayerId) -> f32;

    fn pathway_scale(&self, pathway: PathwayId) -> f32;
    fn set_pathway_scale(&mut self, pathway: PathwayId, abs: f32);

    fn set_layer_mode(&mut self, layer: LayerId, mode: LayerMode);
    /// Clears all external inputs.
    fn init_ext(&mut self);
    fn apply_ext(&mut self, layer: LayerId, values: &[f32]) -> Result<(), NetError>;

    fn init_weights(&mut self, seed: u64);
    /// Per-trial state reset.
    fn alpha_cycle_init(&mut self);
    fn cycle(&mut self, time: &AlphaTime);
    fn quarter_final(&mut self, time: &AlphaTime);
    /// Recomputes input scaling after pathway scales change.
    fn rescale_inputs(&mut self);
    /// Drops incrementally integrated net input so it is recomputed from scratch.
    fn init_g_inc(&mut self);
    fn compute_dwt(&mut self);
    fn apply_dwt(&mut self);

    /// `(sse, avg_sse)` of minus-phase activation against target, ignoring
    /// per-unit differences below `tol`.
    fn layer_mse(&self, layer: LayerId, tol: f32) -> (f64, f64);
    /// Cosine between mean-centred minus and plus phase activations
    /// (1 when the minus phase matches the plus phase exactly).
    fn layer_cos_diff(&self, layer: LayerId) -> f64;

    fn save_weights(&self, path: &Path) -> Result<(), NetError>;
}

/// Layer and pathway handles resolved once per configuration.
#[derive(Clone, Debug)]
pub struct CircuitHandles {
    pub input: LayerId,
    pub ec_in: LayerId,
    pub ec_out: LayerId,
    pub ca1: LayerId,
    pub ca3: LayerId,
    /// ECin → CA1: direct, encoder-driven pathway.
    pub direct: PathwayId,
    /// CA3 → CA1: recurrent, memory-driven pathway.
    pub recurrent: PathwayId,
    pub stat_layers: Vec<LayerId>,
    pub snapshot_layers: Vec<LayerId>,
}

impl CircuitHandles {
    pub fn resolve<N: Network + ?Sized>(
        net: &N,
        cfg: &NetworkConfig,
        snapshot_layers: &[String],
    ) -> Result<Self, NetError> {
        let layer = |name: &str| {
            net.layer_id(name)
                .ok_or_else(|| NetError::UnknownLayer(name.to_string()))
        };
        let pathway = |send: &str, recv: &str| -> Result<PathwayId, NetError> {
            net.pathway_id(layer(send)?, layer(recv)?)
                .ok_or_else(|| NetError::UnknownPathway {
                    send: send.to_string(),
                    recv: recv.to_string(),
                })
        };

        let input = layer(cfg.input.as_str())?;
        let ec_in = layer(cfg.ec_in.as_str())?;
        let ec_out = layer(cfg.ec_out.as_str())?;
        let ca1 = layer(cfg.ca1.as_str())?;
        let ca3 = layer(cfg.ca3.as_str())?;

        let in_len = net.layer_len(ec_in);
        let out_len = net.layer_len(ec_out);
        if in_len != out_len {
            return Err(NetError::SizeMismatch {
                layer: cfg.ec_out.clone(),
                expected: in_len,
                got: out_len,
            });
        }

        Ok(Self {
            input,
            ec_in,
            ec_out,
            ca1,
            ca3,
            direct: pathway(cfg.ec_in.as_str(), cfg.ca1.as_str())?,
            recurrent: pathway(cfg.ca3.as_str(), cfg.ca1.as_str())?,
            stat_layers: cfg
                .stat_layers
                .iter()
                .map(|n| layer(n.as_str()))
                .collect::<Result<_, _>>()?,
            snapshot_layers: snapshot_layers
                .iter()
                .map(|n| layer(n.as_str()))
                .collect::<Result<_, _>>()?,
        })
    }
}
