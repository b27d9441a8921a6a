use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mimcore::prelude::*;

fn settings(dimensions: usize, target: f64) -> Settings {
    let mut settings = Settings::new();
    settings.config.dimensions = dimensions;
    settings.tolerance.target = target;
    settings.log.write = false;
    settings.output.write = false;
    settings
}

/// Benchmark a complete run on the analytic model in one dimension
fn benchmark_driver(c: &mut Criterion) {
    c.bench_function("mimc_1d", |b| {
        b.iter(|| {
            let _ = fit_internal(
                black_box(AnalyticModel::new(1.0, 1)),
                black_box(settings(1, 1e-2)),
            );
        });
    });
}

/// Benchmark the decay fits and error estimates on a sampled profile
fn benchmark_estimation(c: &mut Criterion) {
    let settings = settings(2, 1e-2);
    let model = AnalyticModel::new(1.0, 2);
    let mut profile = IndexProfile::new(2, 10);
    for i in 0..4 {
        for j in 0..(4 - i) {
            let index = MultiIndex::new(vec![i, j]);
            profile.activate(&index).unwrap();
            let stats = profile.stats_mut(&index).unwrap();
            for seed in 0..100 {
                let fine = model.evaluate(&index, seed).unwrap().value;
                stats.push(&fine, &fine, model.cost(&index)).unwrap();
            }
        }
    }
    let estimator = ErrorEstimator::new(&settings).unwrap();

    c.bench_function("estimate", |b| {
        b.iter(|| estimator.estimate(black_box(&profile)));
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(10)
        .noise_threshold(0.10); // Performance changes less than 10% will be ignored
    targets = benchmark_driver, benchmark_estimation
}
criterion_main!(benches);
