//! Small deterministic rate-coded hippocampal circuit.
//!
//! This is a reference [`Network`] used by the binary and the test-suite. It
//! is not meant to reproduce any particular neuron model; it only has to be
//! deterministic for a given seed and expose the variables the trial loop
//! reads (`Act`, `ActQ1`, `ActM`, `ActP`, `Targ`).

use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

use super::{LayerId, LayerMode, NetError, Network, PathwayId, UnitVar};
use crate::core::timebase::AlphaTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LayerKind {
    /// Hard-clamped to external input whenever one is applied.
    Input,
    Hidden,
    /// Clamped to external input in the plus phase when in `Target` mode.
    Output,
}

#[derive(Clone, Debug)]
struct Layer {
    name: String,
    kind: LayerKind,
    mode: LayerMode,
    /// Expected mean activity, used to normalize incoming scales.
    act_avg_init: f32,
    /// Inhibition strength relative to the mean excitatory drive.
    gi: f32,
    act: Vec<f32>,
    act_q1: Vec<f32>,
    act_m: Vec<f32>,
    act_p: Vec<f32>,
    targ: Vec<f32>,
    ext: Option<Vec<f32>>,
    g: Vec<f32>,
}

impl Layer {
    fn new(name: &str, n: usize, kind: LayerKind, act_avg_init: f32, gi: f32) -> Self {
        Self {
            name: name.to_string(),
            kind,
            mode: LayerMode::Target,
            act_avg_init,
            gi,
            act: vec![0.0; n],
            act_q1: vec![0.0; n],
            act_m: vec![0.0; n],
            act_p: vec![0.0; n],
            targ: vec![0.0; n],
            ext: None,
            g: vec![0.0; n],
        }
    }

    fn len(&self) -> usize {
        self.act.len()
    }

    fn clamped(&self, time: &AlphaTime) -> Option<&[f32]> {
        let ext = self.ext.as_deref()?;
        match self.kind {
            LayerKind::Input => Some(ext),
            LayerKind::Output if self.mode == LayerMode::Target && time.plus_phase => Some(ext),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Connectivity {
    OneToOne,
    Full,
    Random(f32),
}

#[derive(Clone, Debug)]
struct Pathway {
    send: usize,
    recv: usize,
    conn: Connectivity,
    /// Row-major `[recv][send]`.
    w: Vec<f32>,
    dw: Vec<f32>,
    mask: Vec<bool>,
    wt_mean: f32,
    wt_var: f32,
    abs: f32,
    rel: f32,
    scale: f32,
    lrate: f32,
    hebb: f32,
    learn: bool,
}

#[derive(Serialize)]
struct PathwayWeights<'a> {
    send: &'a str,
    recv: &'a str,
    rows: usize,
    cols: usize,
    w: &'a [f32],
}

#[derive(Serialize)]
struct WeightsFile<'a> {
    network: &'a str,
    pathways: Vec<PathwayWeights<'a>>,
}

/// Layer sizes of the reference circuit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HipShape {
    pub ec: usize,
    pub dg: usize,
    pub ca3: usize,
    pub ca1: usize,
}

impl Default for HipShape {
    fn default() -> Self {
        Self {
            ec: 8,
            dg: 400,
            ca3: 80,
            ca1: 100,
        }
    }
}

impl HipShape {
    /// Reduced circuit for fast tests.
    pub fn small() -> Self {
        Self {
            ec: 8,
            dg: 40,
            ca3: 20,
            ca1: 20,
        }
    }
}

/// Integration constants of the reference dynamics.
#[derive(Clone, Copy, Debug)]
pub struct HebbianParams {
    pub dt_g: f32,
    pub dt_act: f32,
    pub thr: f32,
    pub gain_k: f32,
}

impl Default for HebbianParams {
    fn default() -> Self {
        Self {
            dt_g: 0.7,
            dt_act: 0.5,
            thr: 0.1,
            gain_k: 0.25,
        }
    }
}

pub struct HebbianNet {
    name: String,
    params: HebbianParams,
    layers: Vec<Layer>,
    pathways: Vec<Pathway>,
    scratch: Vec<f32>,
}

impl HebbianNet {
    /// Builds Input, ECin, ECout, DG, CA3 and CA1 with the usual
    /// perforant, mossy, Schaffer and encoder pathways.
    pub fn hip(shape: HipShape, seed: u64) -> Self {
        let mut net = Self {
            name: "Hip".to_string(),
            params: HebbianParams::default(),
            layers: Vec::new(),
            pathways: Vec::new(),
            scratch: Vec::new(),
        };
        // Update order matters: senders first.
        let input = net.add_layer("Input", shape.ec, LayerKind::Input, 0.2, 0.0);
        let ec_in = net.add_layer("ECin", shape.ec, LayerKind::Hidden, 0.2, 1.0);
        let dg = net.add_layer("DG", shape.dg, LayerKind::Hidden, 0.01, 1.8);
        let ca3 = net.add_layer("CA3", shape.ca3, LayerKind::Hidden, 0.02, 1.4);
        let ca1 = net.add_layer("CA1", shape.ca1, LayerKind::Hidden, 0.1, 1.0);
        let ec_out = net.add_layer("ECout", shape.ec, LayerKind::Output, 0.2, 1.0);

        net.connect(input, ec_in, Connectivity::OneToOne, (1.0, 0.0), 1.0, (0.0, 0.0), false);
        net.connect(ec_in, dg, Connectivity::Random(0.25), (0.5, 0.25), 1.0, (0.4, 0.05), true);
        net.connect(ec_in, ca3, Connectivity::Random(0.25), (0.5, 0.25), 1.0, (0.4, 0.05), true);
        net.connect(dg, ca3, Connectivity::Random(0.05), (0.9, 0.01), 8.0, (0.0, 0.0), false);
        net.connect(ca3, ca3, Connectivity::Full, (0.5, 0.25), 2.0, (0.4, 0.01), true);
        net.connect(ec_in, ca1, Connectivity::Full, (0.5, 0.25), 1.0, (0.02, 0.0), true);
        net.connect(ca3, ca1, Connectivity::Full, (0.5, 0.25), 1.0, (0.05, 0.005), true);
        net.connect(ca1, ec_out, Connectivity::Full, (0.5, 0.25), 1.0, (0.02, 0.0), true);

        net.init_weights(seed);
        net
    }

    fn add_layer(&mut self, name: &str, n: usize, kind: LayerKind, avg: f32, gi: f32) -> usize {
        self.layers.push(Layer::new(name, n, kind, avg, gi));
        self.layers.len() - 1
    }

    #[allow(clippy::too_many_arguments)]
    fn connect(
        &mut self,
        send: usize,
        recv: usize,
        conn: Connectivity,
        (wt_mean, wt_var): (f32, f32),
        rel: f32,
        (lrate, hebb): (f32, f32),
        learn: bool,
    ) {
        let n = self.layers[recv].len() * self.layers[send].len();
        self.pathways.push(Pathway {
            send,
            recv,
            conn,
            w: vec![0.0; n],
            dw: vec![0.0; n],
            mask: vec![false; n],
            wt_mean,
            wt_var,
            abs: 1.0,
            rel,
            scale: 0.0,
            lrate,
            hebb,
            learn,
        });
    }

    fn pathway_drive(&self, p: &Pathway, out: &mut [f32]) {
        let send = &self.layers[p.send].act;
        let cols = send.len();
        for (j, o) in out.iter_mut().enumerate() {
            let row = &p.w[j * cols..(j + 1) * cols];
            let mut acc = 0.0;
            for (w, a) in row.iter().zip(send) {
                acc += w * a;
            }
            *o += p.scale * acc;
        }
    }

    fn update_layer(&mut self, li: usize, time: &AlphaTime) {
        if let Some(ext) = self.layers[li].clamped(time) {
            let ext = ext.to_vec();
            let ly = &mut self.layers[li];
            ly.act.copy_from_slice(&ext);
            return;
        }

        let n = self.layers[li].len();
        let mut net_in = std::mem::take(&mut self.scratch);
        net_in.clear();
        net_in.resize(n, 0.0);
        for p in self.pathways.iter().filter(|p| p.recv == li) {
            self.pathway_drive(p, &mut net_in);
        }

        let HebbianParams {
            dt_g,
            dt_act,
            thr,
            gain_k,
        } = self.params;
        let ly = &mut self.layers[li];
        for (g, x) in ly.g.iter_mut().zip(&net_in) {
            *g += dt_g * (x - *g);
        }
        let mean_g = ly.g.iter().sum::<f32>() / n.max(1) as f32;
        let inhib = thr + ly.gi * mean_g;
        for (act, g) in ly.act.iter_mut().zip(&ly.g) {
            let x = (g - inhib).max(0.0);
            let goal = x / (x + gain_k);
            *act += dt_act * (goal - *act);
        }
        self.scratch = net_in;
    }
}

impl Network for HebbianNet {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer_id(&self, name: &str) -> Option<LayerId> {
        self.layers.iter().position(|l| l.name == name).map(LayerId)
    }

    fn layer_name(&self, layer: LayerId) -> &str {
        &self.layers[layer.0].name
    }

    fn layer_len(&self, layer: LayerId) -> usize {
        self.layers[layer.0].len()
    }

    fn pathway_id(&self, send: LayerId, recv: LayerId) -> Option<PathwayId> {
        self.pathways
            .iter()
            .position(|p| p.send == send.0 && p.recv == recv.0)
            .map(PathwayId)
    }

    fn unit_values(&self, layer: LayerId, var: UnitVar, out: &mut Vec<f32>) {
        let ly = &self.layers[layer.0];
        let src = match var {
            UnitVar::Act => &ly.act,
            UnitVar::ActM => &ly.act_m,
            UnitVar::ActP => &ly.act_p,
            UnitVar::ActQ1 => &ly.act_q1,
            UnitVar::Targ => &ly.targ,
        };
        out.clear();
        out.extend_from_slice(src);
    }

    fn layer_act_avg(&self, layer: LayerId) -> f32 {
        let ly = &self.layers[layer.0];
        ly.act_p.iter().sum::<f32>() / ly.len().max(1) as f32
    }

    fn pathway_scale(&self, pathway: PathwayId) -> f32 {
        self.pathways[pathway.0].abs
    }

    fn set_pathway_scale(&mut self, pathway: PathwayId, abs: f32) {
        self.pathways[pathway.0].abs = abs;
    }

    fn set_layer_mode(&mut self, layer: LayerId, mode: LayerMode) {
        self.layers[layer.0].mode = mode;
    }

    fn init_ext(&mut self) {
        for ly in &mut self.layers {
            ly.ext = None;
            ly.targ.fill(0.0);
        }
    }

    fn apply_ext(&mut self, layer: LayerId, values: &[f32]) -> Result<(), NetError> {
        let ly = &mut self.layers[layer.0];
        if values.len() != ly.len() {
            return Err(NetError::SizeMismatch {
                layer: ly.name.clone(),
                expected: ly.len(),
                got: values.len(),
            });
        }
        ly.targ.copy_from_slice(values);
        ly.ext = Some(values.to_vec());
        Ok(())
    }

    fn init_weights(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        for p in &mut self.pathways {
            let cols = self.layers[p.send].len();
            for (k, (w, m)) in p.w.iter_mut().zip(p.mask.iter_mut()).enumerate() {
                let (j, i) = (k / cols, k % cols);
                *m = match p.conn {
                    Connectivity::OneToOne => i == j,
                    Connectivity::Full => true,
                    Connectivity::Random(pcon) => rng.random::<f32>() < pcon,
                };
                *w = if *m {
                    (p.wt_mean + p.wt_var * rng.random_range(-1.0f32..1.0)).clamp(0.0, 1.0)
                } else {
                    0.0
                };
            }
            p.dw.fill(0.0);
        }
        for ly in &mut self.layers {
            ly.act.fill(0.0);
            ly.g.fill(0.0);
        }
        self.rescale_inputs();
        debug!(seed, network = %self.name, "weights initialized");
    }

    fn alpha_cycle_init(&mut self) {
        for ly in &mut self.layers {
            ly.act.fill(0.0);
            ly.g.fill(0.0);
        }
        self.rescale_inputs();
    }

    fn cycle(&mut self, time: &AlphaTime) {
        for li in 0..self.layers.len() {
            self.update_layer(li, time);
        }
    }

    fn quarter_final(&mut self, time: &AlphaTime) {
        for ly in &mut self.layers {
            match time.quarter {
                0 => ly.act_q1.copy_from_slice(&ly.act),
                2 => ly.act_m.copy_from_slice(&ly.act),
                3 => ly.act_p.copy_from_slice(&ly.act),
                _ => {}
            }
        }
    }

    fn rescale_inputs(&mut self) {
        for li in 0..self.layers.len() {
            let rel_sum: f32 = self
                .pathways
                .iter()
                .filter(|p| p.recv == li && p.abs > 0.0)
                .map(|p| p.rel)
                .sum();
            for p in self.pathways.iter_mut().filter(|p| p.recv == li) {
                let send = &self.layers[p.send];
                let fan_in = match p.conn {
                    Connectivity::OneToOne => 1.0,
                    Connectivity::Full => send.len() as f32,
                    Connectivity::Random(pcon) => send.len() as f32 * pcon,
                };
                let expected = (fan_in * send.act_avg_init).max(1.0);
                p.scale = if rel_sum > 0.0 {
                    p.abs * (p.rel / rel_sum) / expected
                } else {
                    0.0
                };
            }
        }
    }

    fn init_g_inc(&mut self) {
        for ly in &mut self.layers {
            ly.g.fill(0.0);
        }
    }

    fn compute_dwt(&mut self) {
        for p in self.pathways.iter_mut().filter(|p| p.learn) {
            let send = &self.layers[p.send];
            let recv = &self.layers[p.recv];
            let cols = send.len();
            for (k, dw) in p.dw.iter_mut().enumerate() {
                if !p.mask[k] {
                    continue;
                }
                let (j, i) = (k / cols, k % cols);
                let chl = recv.act_p[j] * send.act_p[i] - recv.act_m[j] * send.act_m[i];
                let hebb = recv.act_p[j] * (send.act_p[i] - p.w[k]);
                *dw += p.lrate * ((1.0 - p.hebb) * chl + p.hebb * hebb);
            }
        }
    }

    fn apply_dwt(&mut self) {
        for p in self.pathways.iter_mut().filter(|p| p.learn) {
            for (w, dw) in p.w.iter_mut().zip(p.dw.iter_mut()) {
                *w = (*w + *dw).clamp(0.0, 1.0);
                *dw = 0.0;
            }
        }
    }

    fn layer_mse(&self, layer: LayerId, tol: f32) -> (f64, f64) {
        let ly = &self.layers[layer.0];
        let mut sse = 0.0f64;
        for (t, m) in ly.targ.iter().zip(&ly.act_m) {
            let d = t - m;
            if d.abs() >= tol {
                sse += f64::from(d * d);
            }
        }
        (sse, sse / ly.len().max(1) as f64)
    }

    fn layer_cos_diff(&self, layer: LayerId) -> f64 {
        let ly = &self.layers[layer.0];
        let n = ly.len().max(1) as f64;
        let avg_m = ly.act_m.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
        let avg_p = ly.act_p.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
        let (mut dot, mut ss_m, mut ss_p) = (0.0, 0.0, 0.0);
        for (m, p) in ly.act_m.iter().zip(&ly.act_p) {
            let m = f64::from(*m) - avg_m;
            let p = f64::from(*p) - avg_p;
            dot += m * p;
            ss_m += m * m;
            ss_p += p * p;
        }
        let denom = (ss_m * ss_p).sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    fn save_weights(&self, path: &Path) -> Result<(), NetError> {
        let file = WeightsFile {
            network: &self.name,
            pathways: self
                .pathways
                .iter()
                .map(|p| PathwayWeights {
                    send: &self.layers[p.send].name,
                    recv: &self.layers[p.recv].name,
                    rows: self.layers[p.recv].len(),
                    cols: self.layers[p.send].len(),
                    w: &p.w,
                })
                .collect(),
        };
        let text = serde_json::to_string(&file)?;
        fs::write(path, text).map_err(|source| NetError::WeightsIo {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::timebase::{CYCLES_PER_QUARTER, QUARTERS};

    fn run_trial(net: &mut HebbianNet) {
        let mut time = AlphaTime::default();
        net.alpha_cycle_init();
        time.alpha_cyc_start();
        for _ in 0..QUARTERS {
            for _ in 0..CYCLES_PER_QUARTER {
                net.cycle(&time);
                time.cycle_inc();
            }
            net.quarter_final(&time);
            time.quarter_inc();
        }
    }

    #[test]
    fn same_seed_same_weights() {
        let a = HebbianNet::hip(HipShape::small(), 7);
        let b = HebbianNet::hip(HipShape::small(), 7);
        for (pa, pb) in a.pathways.iter().zip(&b.pathways) {
            assert_eq!(pa.w, pb.w);
        }
        let c = HebbianNet::hip(HipShape::small(), 8);
        assert!(a.pathways.iter().zip(&c.pathways).any(|(pa, pc)| pa.w != pc.w));
    }

    #[test]
    fn input_layer_is_hard_clamped() {
        let mut net = HebbianNet::hip(HipShape::small(), 1);
        let input = net.layer_id("Input").unwrap();
        let pat = [1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        net.apply_ext(input, &pat).unwrap();
        run_trial(&mut net);
        let mut out = Vec::new();
        net.unit_values(input, UnitVar::ActQ1, &mut out);
        assert_eq!(out, pat);
    }

    #[test]
    fn apply_ext_rejects_wrong_width() {
        let mut net = HebbianNet::hip(HipShape::small(), 1);
        let ec_out = net.layer_id("ECout").unwrap();
        let err = net.apply_ext(ec_out, &[1.0; 3]).unwrap_err();
        assert!(matches!(err, NetError::SizeMismatch { expected: 8, got: 3, .. }));
    }

    #[test]
    fn dwt_is_deferred_until_applied() {
        let mut net = HebbianNet::hip(HipShape::small(), 3);
        let input = net.layer_id("Input").unwrap();
        let ec_out = net.layer_id("ECout").unwrap();
        let pat = [1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        net.apply_ext(input, &pat).unwrap();
        net.apply_ext(ec_out, &pat).unwrap();
        run_trial(&mut net);
        let before: Vec<Vec<f32>> = net.pathways.iter().map(|p| p.w.clone()).collect();
        net.compute_dwt();
        let after_dwt: Vec<Vec<f32>> = net.pathways.iter().map(|p| p.w.clone()).collect();
        assert_eq!(before, after_dwt);
        net.apply_dwt();
        assert!(net.pathways.iter().all(|p| p.dw.iter().all(|&d| d == 0.0)));
    }

    #[test]
    fn zero_abs_gives_other_pathway_full_share() {
        let mut net = HebbianNet::hip(HipShape::small(), 1);
        let ec_in = net.layer_id("ECin").unwrap();
        let ca3 = net.layer_id("CA3").unwrap();
        let ca1 = net.layer_id("CA1").unwrap();
        let direct = net.pathway_id(ec_in, ca1).unwrap();
        let recurrent = net.pathway_id(ca3, ca1).unwrap();
        net.set_pathway_scale(direct, 0.0);
        net.set_pathway_scale(recurrent, 1.0);
        net.rescale_inputs();
        assert_eq!(net.pathways[direct.0].scale, 0.0);
        assert!(net.pathways[recurrent.0].scale > 0.0);
    }
}
