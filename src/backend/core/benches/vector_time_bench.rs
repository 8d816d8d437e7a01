//! Benchmarks for vector time comparison and merge.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use causal_log_core::events::{Aggregate, ConcurrentVersions, CreatorOrder};
use causal_log_core::time::{VectorClock, VectorTime};

fn vector_time(processes: usize, offset: u64) -> VectorTime {
    VectorTime::from_entries((0..processes).map(|i| (format!("process-{i}"), i as u64 + offset)))
}

fn bench_vector_time_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_time_compare");
    for size in [4, 16, 64, 256] {
        let a = vector_time(size, 1);
        let b = vector_time(size, 2);
        let concurrent = a.set_local_time(&"extra".into(), 1);
        group.bench_with_input(BenchmarkId::new("before", size), &size, |bench, _| { bench.iter(|| black_box(a.compare(&b))); });
        group.bench_with_input(BenchmarkId::new("concurrent", size), &size, |bench, _| { bench.iter(|| black_box(concurrent.compare(&b))); });
        group.bench_with_input(BenchmarkId::new("dominated_by", size), &size, |bench, _| { bench.iter(|| black_box(a.dominated_by(&b))); });
    }
    group.finish();
}

fn bench_vector_time_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_time_merge");
    for size in [4, 16, 64, 256] {
        let a = vector_time(size, 1);
        let b = vector_time(size / 2, 5);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, _| { bench.iter(|| black_box(a.merge(&b))); });
    }
    group.finish();
}

fn bench_vector_clock(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_clock");
    let remote = vector_time(32, 3);
    group.bench_function("tick", |b| { let mut clock = VectorClock::new("local"); b.iter(|| black_box(clock.tick())); });
    group.bench_function("update", |b| { let mut clock = VectorClock::new("local"); b.iter(|| black_box(clock.update(&remote))); });
    group.finish();
}

#[derive(Debug, Clone, Default)]
struct Counter(u64);

impl Aggregate for Counter {
    type Event = u64;

    fn apply(&mut self, delta: &u64) {
        self.0 += delta;
    }
}

fn bench_concurrent_versions(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_versions");
    for writers in [2, 8, 32] {
        group.bench_with_input(BenchmarkId::new("fork_and_resolve", writers), &writers, |b, &n| {
            b.iter(|| {
                let mut versions = ConcurrentVersions::<Counter>::new();
                for i in 0..n {
                    let ts = VectorTime::from_entries([(format!("writer-{i}"), 1)]);
                    versions.apply_update(&1, &ts, &format!("writer-{i}").into(), None).unwrap();
                }
                black_box(versions.resolve_automatically(&CreatorOrder::Ascending).unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_vector_time_compare, bench_vector_time_merge, bench_vector_clock, bench_concurrent_versions);
criterion_main!(benches);
