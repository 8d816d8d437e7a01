//! Benchmarks for stamping local writes and filtering replicated ones.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use chrono::Utc;
use causal_log_core::events::DurableEvent;
use causal_log_core::time::{LogId, VectorTime};
use causal_log_core::tracker::{NoopStatsSink, ReplicationFilter, ReplicationWrite, TimeTracker};

fn local_events(count: usize) -> Vec<DurableEvent<u64>> {
    (1..=count as u64).map(|i| DurableEvent::new(i, "writer", VectorTime::from_entries([("writer", i)]))).collect()
}

/// Events from `sources` remote logs, stamped by their origin.
fn remote_events(sources: usize, per_source: u64) -> Vec<DurableEvent<u64>> {
    let now = Utc::now();
    (0..sources)
        .flat_map(|s| {
            let source: LogId = format!("remote-{s}").into();
            (1..=per_source).map(move |i| {
                DurableEvent::new(i, source.as_str(), VectorTime::from_entries([(source.as_str(), i)])).prepare(&source, i, now)
            })
        })
        .collect()
}

fn bench_prepare_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("prepare_write");
    let log: LogId = "local".into();
    for batch in [1, 16, 256] {
        let events = local_events(batch);
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &events, |b, events| {
            let tracker = TimeTracker::new();
            b.iter(|| black_box(tracker.prepare_write(&log, events.clone(), Utc::now()).unwrap()));
        });
    }
    group.finish();
}

fn bench_prepare_replicate(c: &mut Criterion) {
    let mut group = c.benchmark_group("prepare_replicate");
    let log: LogId = "local".into();
    for sources in [1, 8, 32] {
        let events = remote_events(sources, 32);
        let (_, caught_up) = TimeTracker::new().prepare_replicate(&log, events.clone(), ReplicationFilter::Observed, &NoopStatsSink).unwrap();
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(BenchmarkId::new("admit_all", sources), &events, |b, events| {
            let tracker = TimeTracker::new();
            b.iter(|| black_box(tracker.prepare_replicate(&log, events.clone(), ReplicationFilter::Observed, &NoopStatsSink).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("drop_all", sources), &events, |b, events| {
            b.iter(|| black_box(caught_up.prepare_replicate(&log, events.clone(), ReplicationFilter::Observed, &NoopStatsSink).unwrap()));
        });
    }
    group.finish();
}

fn bench_prepare_replicate_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("prepare_replicate_batch");
    let log: LogId = "local".into();
    let events = remote_events(8, 64);
    let writes: Vec<ReplicationWrite<u64>> = events.chunks(64).enumerate().map(|(s, chunk)| ReplicationWrite::new(format!("remote-{s}"), chunk.to_vec(), 64)).collect();
    group.bench_function("8x64", |b| {
        let tracker = TimeTracker::new();
        b.iter(|| black_box(tracker.prepare_replicate_batch(&log, writes.clone(), ReplicationFilter::Observed, &NoopStatsSink).unwrap()));
    });
    group.finish();
}

fn bench_recover(c: &mut Criterion) {
    let log: LogId = "local".into();
    let (stamped, _) = TimeTracker::new().prepare_write(&log, local_events(10_000), Utc::now()).unwrap();
    c.bench_function("recover_10k", |b| { b.iter(|| black_box(TimeTracker::recover(&stamped).unwrap())); });
}

criterion_group!(benches, bench_prepare_write, bench_prepare_replicate, bench_prepare_replicate_batch, bench_recover);
criterion_main!(benches);
