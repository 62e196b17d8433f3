use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::Duration;

use writerlease::{Backoff, DelayingQueue};

fn bench_queue_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("delaying_queue");

    for keys in [1usize, 64, 1024] {
        let names: Vec<String> = (0..keys).map(|i| format!("key-{i}")).collect();
        group.throughput(Throughput::Elements(keys as u64));
        group.bench_with_input(BenchmarkId::new("add_get_done", keys), &names, |b, names| {
            let queue = DelayingQueue::new();
            b.iter(|| {
                for name in names {
                    queue.add(name.as_str());
                    // Duplicate adds must coalesce.
                    queue.add(name.as_str());
                }
                for _ in 0..names.len() {
                    if let Some(key) = queue.get() {
                        queue.done(black_box(&key));
                    }
                }
            });
        });
    }

    group.finish();
}

fn bench_backoff(c: &mut Criterion) {
    let backoff = Backoff::default();
    let cap = Duration::from_secs(60);

    c.bench_function("backoff_delay_step_5", |b| {
        b.iter(|| backoff.delay(black_box(5), cap));
    });
}

criterion_group!(benches, bench_queue_cycle, bench_backoff);
criterion_main!(benches);
