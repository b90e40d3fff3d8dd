//! Push-mode throughput of small pipelines.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use sluice::caps::{Caps, parse_caps};
use sluice::elements::{FakeSink, FakeSrc, Identity, Queue};
use sluice::prelude::*;
use std::hint::black_box;
use std::time::Duration;

const BUFFERS: u64 = 1_000;
const TIMEOUT: Option<Duration> = Some(Duration::from_secs(60));

fn run_chain(size: usize, scheduling: SchedulingMode, with_queue: bool) -> u64 {
    let pipeline = Pipeline::with_config(
        PipelineConfig::default()
            .with_name("bench")
            .with_scheduling(scheduling),
    );
    let src = FakeSrc::new()
        .with_num_buffers(BUFFERS)
        .with_size(size)
        .build("src");
    let identity = Identity::new().build("identity");
    let sink = FakeSink::new();
    let stats = sink.stats();
    let sink = sink.build("sink");
    pipeline.add_many(&[&src, &identity, &sink]).unwrap();
    if with_queue {
        let queue = Queue::new().build("queue");
        pipeline.add(&queue).unwrap();
        Element::link_many(&[&src, &identity, &queue, &sink]).unwrap();
    } else {
        Element::link_many(&[&src, &identity, &sink]).unwrap();
    }
    pipeline.run(TIMEOUT).unwrap();
    stats.bytes()
}

fn bench_push_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_chain");
    group.sample_size(20);

    for size in [64usize, 4096, 64 * 1024] {
        group.throughput(Throughput::Bytes(size as u64 * BUFFERS));
        group.bench_with_input(BenchmarkId::new("threaded", size), &size, |b, &size| {
            b.iter(|| black_box(run_chain(size, SchedulingMode::Threaded, false)));
        });
        group.bench_with_input(BenchmarkId::new("cooperative", size), &size, |b, &size| {
            b.iter(|| black_box(run_chain(size, SchedulingMode::Cooperative, false)));
        });
        group.bench_with_input(BenchmarkId::new("queued", size), &size, |b, &size| {
            b.iter(|| black_box(run_chain(size, SchedulingMode::Threaded, true)));
        });
    }

    group.finish();
}

fn bench_caps(c: &mut Criterion) {
    let mut group = c.benchmark_group("caps");
    let offered =
        parse_caps("audio/x-raw, rate=(int){44100, 48000, 96000}, channels=(int)[1, 8]").unwrap();
    let wanted = parse_caps("audio/x-raw, rate=(int)[40000, 50000], channels=(int)2").unwrap();

    group.bench_function("intersect", |b| {
        b.iter(|| black_box(offered.intersect(black_box(&wanted))));
    });
    group.bench_function("intersect_fixate", |b| {
        b.iter(|| {
            let common: Caps = offered.intersect(&wanted);
            black_box(common.fixate())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_push_chain, bench_caps);
criterion_main!(benches);
