/// Aggregation benchmarks
///
/// Benchmarks:
/// 1. Homomorphic add of two ciphertexts
/// 2. Full fold + decrypt of one round at several contributor counts
///
/// Run with: cargo bench --bench aggregation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use secagg_core::crypto_he::KEY_LEN;
use secagg_core::{AdditiveHomomorphic, AggregationCoordinator, Contribution, InMemoryModel, MaskedSumScheme};
use std::collections::BTreeMap;
use std::sync::Arc;

const PARAM_LEN: usize = 1024;

fn bench_add(c: &mut Criterion) {
    let he = MaskedSumScheme::new([1u8; KEY_LEN]);
    let a = he.encode(&vec![0.5; PARAM_LEN]).unwrap();
    let b = he.encode(&vec![0.25; PARAM_LEN]).unwrap();
    c.bench_function("masked_add_1024", |bench| {
        bench.iter(|| black_box(he.add(&a, &b).unwrap()));
    });
}

fn bench_round(c: &mut Criterion) {
    let he = MaskedSumScheme::new([1u8; KEY_LEN]);
    let mut group = c.benchmark_group("aggregate_round");
    for clients in [4usize, 16, 64] {
        let encoded: Vec<_> = (0..clients)
            .map(|_| BTreeMap::from([
                ("dense".to_string(), he.encode(&vec![0.1; PARAM_LEN]).unwrap()),
                ("bias".to_string(), he.encode(&[0.1; 16]).unwrap()),
            ]))
            .collect();
        group.throughput(Throughput::Elements(clients as u64));
        group.bench_with_input(BenchmarkId::from_parameter(clients), &encoded, |bench, encoded| {
            bench.iter(|| {
                let model = Arc::new(InMemoryModel::new(BTreeMap::from([
                    ("dense".to_string(), vec![0.0; PARAM_LEN]),
                    ("bias".to_string(), vec![0.0; 16]),
                ])));
                let coord = AggregationCoordinator::new(he.clone(), model, 2).unwrap();
                for (i, gradients) in encoded.iter().enumerate() {
                    coord.receive_update(&format!("c{i}"), Contribution::new(1, gradients.clone())).unwrap();
                }
                black_box(coord.aggregate_updates().unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_add, bench_round);
criterion_main!(benches);
