use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rangeflow_transfer::core::{ChunkPlan, RANGE_MAX_SIZE};

fn bench_plan_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_plan");

    for size in [
        16 * 1024 * 1024u64,       // 16MB
        1024 * 1024 * 1024,        // 1GB
        64 * 1024 * 1024 * 1024,   // 64GB
    ] {
        let plan = ChunkPlan::new(size, RANGE_MAX_SIZE).unwrap();
        group.throughput(Throughput::Elements(plan.len()));
        group.bench_with_input(BenchmarkId::new("iterate", size), &plan, |b, plan| {
            b.iter(|| {
                let total: u64 = plan.iter().map(|chunk| black_box(chunk).length).sum();
                black_box(total)
            });
        });
    }

    group.finish();
}

fn bench_plan_lookup(c: &mut Criterion) {
    let plan = ChunkPlan::new(4 * 1024 * 1024 * 1024 * 1024, RANGE_MAX_SIZE).unwrap();
    let last = plan.len() - 1;

    c.bench_function("chunk_plan_get_last", |b| {
        b.iter(|| black_box(plan.get(black_box(last))));
    });
}

criterion_group!(benches, bench_plan_iteration, bench_plan_lookup);
criterion_main!(benches);
