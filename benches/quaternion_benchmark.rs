//! Quaternion throughput benchmark
//!
//! Measures the batched conversions on random unit quaternions, with and
//! without derivative propagation.
//!
//! ## Usage
//!
//! ```bash
//! cargo bench --bench quaternion_benchmark
//! ```

use std::hint::black_box;

use apex_rotation::{EulerAxes, Mask, Quaternion, Scalar, init_logger_with_level};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ndarray::{ArrayD, IxDyn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{Level, info};

const BATCH_SIZES: [usize; 3] = [100, 1_000, 10_000];

fn random_batch(seed: u64, size: usize) -> Quaternion {
    Quaternion::random_with(&mut StdRng::seed_from_u64(seed), &[size])
}

fn with_unit_derivative(q: &Quaternion) -> Quaternion {
    let mut q = q.clone();
    let deriv = Quaternion::with_mask_and_denominator(
        ArrayD::ones(IxDyn(&[q.size(), 4, 1])),
        Mask::none(),
        1,
    )
    .expect("derivative layout");
    q.insert_deriv("t", deriv).expect("derivative insertion");
    q
}

fn bench_matrix_conversions(c: &mut Criterion) {
    let mut group = c.benchmark_group("matrix_conversion");

    for size in BATCH_SIZES {
        let q = random_batch(size as u64, size);
        let q_t = with_unit_derivative(&q);
        let m = q.to_matrix3(false).expect("to_matrix3");

        group.bench_with_input(BenchmarkId::new("to_matrix3", size), &q, |b, q| {
            b.iter(|| black_box(q.to_matrix3(false)))
        });
        group.bench_with_input(BenchmarkId::new("to_matrix3_derivs", size), &q_t, |b, q| {
            b.iter(|| black_box(q.to_matrix3(true)))
        });
        group.bench_with_input(BenchmarkId::new("from_matrix3", size), &m, |b, m| {
            b.iter(|| black_box(Quaternion::from_matrix3(m, false)))
        });
        group.bench_with_input(BenchmarkId::new("from_matrix3_experimental", size), &m, |b, m| {
            b.iter(|| black_box(Quaternion::from_matrix3_experimental(m, false)))
        });
    }

    group.finish();
}

fn bench_algebra(c: &mut Criterion) {
    let mut group = c.benchmark_group("algebra");

    for size in BATCH_SIZES {
        let a = random_batch(size as u64, size);
        let b = random_batch(size as u64 + 1, size);
        let a_t = with_unit_derivative(&a);

        group.bench_with_input(BenchmarkId::new("multiply", size), &(&a, &b), |bench, (a, b)| {
            bench.iter(|| black_box(a.multiply(*b, false)))
        });
        group.bench_with_input(BenchmarkId::new("multiply_derivs", size), &(&a_t, &b), |bench, (a, b)| {
            bench.iter(|| black_box(a.multiply(*b, true)))
        });
        group.bench_with_input(BenchmarkId::new("reciprocal", size), &a, |bench, a| {
            bench.iter(|| black_box(a.reciprocal(false)))
        });
    }

    group.finish();
}

fn bench_euler(c: &mut Criterion) {
    let mut group = c.benchmark_group("euler");

    for size in BATCH_SIZES {
        let angles: Vec<f64> = (0..size).map(|i| (i as f64 * 0.37) % 3.0).collect();
        let ai = Scalar::from_slice(&angles);
        let aj = Scalar::from_value(0.4);
        let ak = Scalar::from_value(-1.2);
        let q = random_batch(size as u64, size);

        group.bench_function(BenchmarkId::new("from_euler", size), |b| {
            b.iter(|| black_box(Quaternion::from_euler(&ai, &aj, &ak, EulerAxes::Rzxz, false)))
        });
        group.bench_with_input(BenchmarkId::new("to_euler", size), &q, |b, q| {
            b.iter(|| black_box(q.to_euler(EulerAxes::Rzxz)))
        });
    }

    group.finish();
}

fn criterion_benchmark(c: &mut Criterion) {
    init_logger_with_level(Level::WARN);
    info!("Running quaternion benchmarks for batch sizes {BATCH_SIZES:?}");

    bench_matrix_conversions(c);
    bench_algebra(c);
    bench_euler(c);
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
