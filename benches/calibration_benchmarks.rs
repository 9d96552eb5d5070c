use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pacing_model::aggregation::aggregate_heart_rate;
use pacing_model::hrv::HrvProfile;
use pacing_model::simulator::AnchoredInput;
use pacing_model::{
    CrossCycleAggregator, EnergySimulator, HeartRateSample, HrvEstimator, ModelConfig,
    ModelParameters, ValidatedEnergySample,
};

/// Performance benchmarks for the calibration and forecasting pipeline
///
/// Dataset sizes cover a single evening up to a month of minute-level
/// heart rate.

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

fn bpm_at(t: DateTime<Utc>) -> f64 {
    match t.hour() {
        22..=23 | 0..=5 => 54.0 + (t.minute() % 3) as f64,
        6..=7 => 75.0,
        8..=11 => 95.0,
        12..=13 => 118.0,
        14..=19 => 85.0,
        _ => 80.0,
    }
}

fn minute_series(minutes: i64) -> Vec<HeartRateSample> {
    (0..minutes)
        .map(|m| {
            let t = start() + Duration::minutes(m);
            HeartRateSample::new(t, bpm_at(t))
        })
        .collect()
}

fn ratings(heart_rate: &[HeartRateSample]) -> Vec<ValidatedEnergySample> {
    let aggregated = aggregate_heart_rate(heart_rate, Duration::minutes(15));
    EnergySimulator::new()
        .simulate_plain(&aggregated, &ModelParameters::new(60.0, 100.0, 1.5, 2.0), 50.0)
        .into_iter()
        .filter(|p| p.timestamp.minute() == 0 && matches!(p.timestamp.hour(), 9 | 13 | 16 | 20))
        .map(|p| ValidatedEnergySample::new(p.timestamp, p.energy))
        .collect()
}

fn bench_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Heart Rate Aggregation");

    for &days in &[1i64, 7, 30] {
        let samples = minute_series(days * 24 * 60);
        group.throughput(Throughput::Elements(samples.len() as u64));
        group.bench_with_input(BenchmarkId::new("aggregate_15min", days), &samples, |b, s| {
            b.iter(|| aggregate_heart_rate(black_box(s), Duration::minutes(15)));
        });
    }

    group.finish();
}

fn bench_simulation(c: &mut Criterion) {
    let simulator = EnergySimulator::new();
    let params = ModelParameters::default();
    let mut group = c.benchmark_group("Energy Simulation");

    for &days in &[1i64, 7] {
        let raw = minute_series(days * 24 * 60);
        let aggregated = aggregate_heart_rate(&raw, Duration::minutes(15));
        let validated = ratings(&raw);
        let hrv = HrvEstimator::new().profile(&raw);

        group.throughput(Throughput::Elements(aggregated.len() as u64));
        group.bench_with_input(BenchmarkId::new("plain", days), &aggregated, |b, hr| {
            b.iter(|| simulator.simulate_plain(black_box(hr), &params, 50.0));
        });
        group.bench_with_input(BenchmarkId::new("anchored", days), &aggregated, |b, hr| {
            b.iter(|| {
                simulator.simulate_anchored(
                    AnchoredInput {
                        heart_rate: black_box(hr),
                        hrv: &hrv,
                        validated: &validated,
                        wake_events: &[],
                        fallback_start: 50.0,
                    },
                    &params,
                )
            });
        });
    }

    group.finish();
}

fn bench_hrv(c: &mut Criterion) {
    let raw = minute_series(2 * 60);
    let estimator = HrvEstimator::new();
    c.bench_function("hrv_profile_2h", |b| {
        b.iter(|| -> HrvProfile { estimator.profile(black_box(&raw)) });
    });
}

fn bench_auto_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("Cross-Cycle Calibration");
    group.sample_size(10);

    for &days in &[3i64, 7] {
        let raw = minute_series(days * 24 * 60);
        let validated = ratings(&raw);
        let aggregated = aggregate_heart_rate(&raw, Duration::minutes(15));

        let mut sequential_config = ModelConfig::default();
        sequential_config.calibration.parallel = false;
        let sequential = CrossCycleAggregator::with_config(&sequential_config);
        let parallel = CrossCycleAggregator::new();

        group.bench_with_input(BenchmarkId::new("sequential", days), &aggregated, |b, hr| {
            b.iter(|| sequential.auto_fit(black_box(hr), &validated));
        });
        group.bench_with_input(BenchmarkId::new("parallel", days), &aggregated, |b, hr| {
            b.iter(|| parallel.auto_fit(black_box(hr), &validated));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_aggregation,
    bench_simulation,
    bench_hrv,
    bench_auto_fit
);
criterion_main!(benches);
