//! Scheduler and pipeline performance benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_taskflow::prelude::*;

fn bench_post_and_get(c: &mut Criterion) {
    let scheduler = Scheduler::new(SchedulerConfig::with_workers(4)).unwrap();

    c.bench_function("post_and_get", |b| {
        b.iter(|| {
            let channel = scheduler.post(Task::new(|| black_box(42))).unwrap();
            black_box(channel.get().unwrap());
        })
    });
}

fn bench_post_batch(c: &mut Criterion) {
    let scheduler = Scheduler::new(SchedulerConfig::with_workers(4)).unwrap();

    c.bench_function("post_batch_1000", |b| {
        b.iter(|| {
            let channels: Vec<_> = (0..1000)
                .map(|i| {
                    scheduler
                        .post(Task::new(move || {
                            let mut sum = 0u64;
                            for j in 0..100 {
                                sum += j * i;
                            }
                            black_box(sum)
                        }))
                        .unwrap()
                })
                .collect();

            let total: u64 = channels.iter().map(|c| c.get().unwrap()).sum();
            black_box(total);
        })
    });
}

fn bench_auto_chain(c: &mut Criterion) {
    let scheduler = Scheduler::new(SchedulerConfig::with_workers(4)).unwrap();
    let pipeline = AutoChain::new(scheduler);
    for i in 0..16 {
        pipeline.add(Activity::new(move || black_box(i * 2)));
    }

    c.bench_function("auto_chain_16", |b| {
        b.iter(|| {
            pipeline.execute(ExecuteMode::Async).unwrap().get().unwrap();
            pipeline.reset();
        })
    });
}

fn bench_concurrent_pipeline(c: &mut Criterion) {
    let scheduler = Scheduler::new(SchedulerConfig::with_workers(4)).unwrap();
    let pipeline = ConcurrentPipeline::new(scheduler);
    for i in 0..16 {
        pipeline.add(Activity::new(move || {
            let mut sum = 0u64;
            for j in 0..1000 {
                sum += j ^ i;
            }
            black_box(sum)
        }));
    }

    c.bench_function("concurrent_pipeline_16", |b| {
        b.iter(|| {
            pipeline.execute(ExecuteMode::Async).unwrap().get().unwrap();
            pipeline.reset();
        })
    });
}

criterion_group!(
    benches,
    bench_post_and_get,
    bench_post_batch,
    bench_auto_chain,
    bench_concurrent_pipeline
);
criterion_main!(benches);
