use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rtdiag::system::memory::{aggregate_sites, rank_sites};
use rtdiag::system::tracker::TracedAllocation;
use std::hint::black_box;

fn make_traces(n: usize) -> Vec<TracedAllocation> {
    (0..n)
        .map(|i| {
            let frames = [0x1000 + (i % 257), 0x2000 + (i % 31), 0x3000];
            TracedAllocation::new((i % 4096) + 16, &frames)
        })
        .collect()
}

fn bench_aggregate_and_rank(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate_rank_1000_10000_100000");
    for &n in &[1_000usize, 10_000, 100_000] {
        let traces = make_traces(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &traces, |b, traces| {
            b.iter(|| {
                let totals = aggregate_sites(black_box(traces), |frames| {
                    ("src/bench.rs".to_string(), frames[0] as u32)
                });
                black_box(rank_sites(totals, 3))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_aggregate_and_rank);
criterion_main!(benches);
