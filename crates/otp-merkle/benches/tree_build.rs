use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use otp_merkle::{compute_tree, Sha256Hasher, TreeParams};

const INTERVAL: u64 = 30_000;

fn bench_tree_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_tree");
    group.sample_size(10);

    // one day, one week, thirty days of 30s intervals
    for intervals in [2_880u64, 20_160, 86_400] {
        let params = TreeParams::new(vec![7u8; 20], [1u8; 32], 0, INTERVAL * intervals)
            .with_inner_trees(6);
        group.bench_with_input(BenchmarkId::from_parameter(intervals), &params, |b, params| {
            b.iter(|| compute_tree(params, &Sha256Hasher, &mut |_| {}, &|| false).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_tree_build);
criterion_main!(benches);
