//! Benchmarks for one alpha-cycle trial on the reference circuit.
//!
//! Run:
//! - cargo bench --bench alpha_cycle

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use hippo_recall::config::NetworkConfig;
use hippo_recall::net::hebbian::{HebbianNet, HipShape};
use hippo_recall::net::{CircuitHandles, Network};
use hippo_recall::sim::AlphaCycleController;
use hippo_recall::sim::recall::RecallScorer;
use hippo_recall::sim::sink::{NullSink, SnapshotScale, TrialKey};

const PAT: [f32; 8] = [1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
const CUE: [f32; 8] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];

fn shapes() -> [(&'static str, HipShape); 2] {
    [("small", HipShape::small()), ("default", HipShape::default())]
}

fn bench_trial(c: &mut Criterion) {
    let mut group = c.benchmark_group("alpha_cycle_trial");
    group.sample_size(30);

    for (label, shape) in shapes() {
        for train in [true, false] {
            let mut net = HebbianNet::hip(shape, 1);
            let handles = CircuitHandles::resolve(&net, &NetworkConfig::default(), &[]).unwrap();
            let mut ctl = AlphaCycleController::new(handles.clone(), 0.34, SnapshotScale::None);
            net.init_ext();
            net.apply_ext(handles.input, &CUE).unwrap();
            net.apply_ext(handles.ec_out, &PAT).unwrap();
            let key = TrialKey::default();

            let mode = if train { "train" } else { "test" };
            let id = BenchmarkId::new(label, mode);
            group.bench_function(id, |b| {
                b.iter(|| {
                    let out = ctl
                        .run_trial(black_box(&mut net), train, &key, &mut NullSink)
                        .unwrap();
                    black_box(out);
                });
            });
        }
    }

    group.finish();
}

fn bench_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("recall_score");
    group.sample_size(50);

    for units in [8usize, 64, 512] {
        let cmp: Vec<f32> = (0..units).map(|i| ((i * 37) % 100) as f32 / 100.0).collect();
        let trg: Vec<f32> = (0..units).map(|i| (i % 3 == 0) as u8 as f32).collect();
        let drv: Vec<f32> = (0..units).map(|i| (i % 6 == 0) as u8 as f32).collect();
        let mut scorer = RecallScorer::default();

        group.bench_with_input(BenchmarkId::new("units", units), &units, |b, _| {
            b.iter(|| black_box(scorer.score(false, black_box(&cmp), &trg, &drv)));
        });
    }

    group.finish();
}

criterion_group!(alpha_cycle, bench_trial, bench_scoring);
criterion_main!(alpha_cycle);
