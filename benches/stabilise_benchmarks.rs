//! Performance benchmarks for the rigstream stabilisation and focus pipeline
//!
//! Run with: cargo bench --bench stabilise_benchmarks
//!
//! Measures per-frame cost of both stabilisation engines and the sharpness
//! metrics at common rig resolutions.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rigstream::config::RigConfig;
use rigstream::stabilise::{EngineKind, StabiliserState};
use rigstream::testing::{shifted_frame, textured_frame};
use rigstream::{SharpnessAnalyzer, SharpnessMetric};
use std::time::Duration;

fn bench_engines(c: &mut Criterion) {
    let mut group = c.benchmark_group("Stabilise");
    group.measurement_time(Duration::from_secs(5));

    let resolutions = [(320, 240, "240p"), (640, 480, "480p")];

    for (width, height, name) in resolutions {
        let reference = shifted_frame(width, height, 11, 0, 0);
        let moved = shifted_frame(width, height, 11, 7, -3);
        group.throughput(Throughput::Elements((width * height) as u64));

        for kind in [EngineKind::PhaseCorrelation, EngineKind::Correlation] {
            let mut config = RigConfig::default().stabilisation;
            config.engine = kind;
            group.bench_with_input(BenchmarkId::new(kind.as_str(), name), &moved, |b, frame| {
                let mut state = StabiliserState::new(&config);
                state.stabilise(&reference).expect("reference frame");
                b.iter(|| {
                    // Correlation templates follow the scene, so re-seed each time
                    if kind == EngineKind::Correlation {
                        state.reset();
                        state.stabilise(&reference).expect("reference frame");
                    }
                    black_box(state.stabilise(black_box(frame)).expect("offset"))
                });
            });
        }
    }

    group.finish();
}

fn bench_sharpness(c: &mut Criterion) {
    let mut group = c.benchmark_group("Sharpness");
    let frame = textured_frame(640, 480, 5);
    group.throughput(Throughput::Elements(640 * 480));

    for metric in [
        SharpnessMetric::VarianceOfLaplacian,
        SharpnessMetric::Tenengrad,
        SharpnessMetric::Brenner,
    ] {
        let analyzer = SharpnessAnalyzer::new(metric);
        group.bench_function(BenchmarkId::new("score", format!("{:?}", metric)), |b| {
            b.iter(|| black_box(analyzer.score(black_box(&frame))))
        });
    }

    let analyzer = SharpnessAnalyzer::default();
    group.bench_function("grid_8x6", |b| {
        b.iter(|| black_box(analyzer.score_grid(black_box(&frame), 8, 6)))
    });

    group.finish();
}

criterion_group!(benches, bench_engines, bench_sharpness);
criterion_main!(benches);
