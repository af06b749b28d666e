use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use jobweave::scheduler::JobQueue;
use jobweave::{Coro, Function, JobSystem, JobSystemConfig};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(30);

fn create_bench_system(workers: usize) -> JobSystem {
    let config = JobSystemConfig::new(workers).with_queue_capacity(1 << 14);
    let mut system = JobSystem::with_config(config).unwrap();
    system.start().unwrap();
    system
}

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    let count = 1024usize;
    group.throughput(Throughput::Elements(count as u64));

    group.bench_function("push_pop", |b| {
        let queue = JobQueue::new(count);
        b.iter(|| {
            for i in 0..count {
                queue.push(black_box(i)).unwrap();
            }
            while let Some(item) = queue.pop() {
                black_box(item);
            }
        });
    });

    group.bench_function("push_steal", |b| {
        let queue = JobQueue::new(count);
        let stealer = queue.stealer();
        b.iter(|| {
            for i in 0..count {
                queue.push(black_box(i)).unwrap();
            }
            while let Some(item) = stealer.steal() {
                black_box(item);
            }
        });
    });

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    let system = create_bench_system(0);

    for children in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(children as u64));
        group.bench_with_input(
            BenchmarkId::new("function", children),
            &children,
            |b, &children| {
                b.iter(|| {
                    system
                        .schedule(Function::new(move |ctx| {
                            for i in 0..children {
                                ctx.schedule(Function::new(move |_| {
                                    black_box(i);
                                }))
                                .unwrap();
                            }
                            ctx.continuation(Function::new(|_| {})).unwrap();
                        }))
                        .unwrap();
                    assert!(system.wait_all(TIMEOUT));
                });
            },
        );
    }

    group.finish();
}

fn fib(n: u64) -> Coro<u64> {
    Coro::new(move |ctx| async move {
        if n < 2 {
            return n;
        }
        match ctx.join((fib(n - 1), fib(n - 2))).await {
            Ok((Ok(a), Ok(b))) => a + b,
            _ => 0,
        }
    })
}

fn bench_coroutines(c: &mut Criterion) {
    let mut group = c.benchmark_group("coroutines");
    let system = create_bench_system(0);

    for n in [10u64, 15] {
        group.bench_with_input(BenchmarkId::new("fib", n), &n, |b, &n| {
            b.iter(|| {
                let root = fib(black_box(n));
                let promise = root.promise();
                system.schedule(root).unwrap();
                promise.wait_timeout(TIMEOUT).unwrap()
            });
        });
    }

    group.finish();
}

fn bench_spawn_single(c: &mut Criterion) {
    let system = create_bench_system(1);

    c.bench_function("schedule_and_wait", |b| {
        b.iter(|| {
            system.schedule(Function::new(|_| {})).unwrap();
            assert!(system.wait_all(TIMEOUT));
        });
    });
}

criterion_group!(
    benches,
    bench_queue,
    bench_fan_out,
    bench_coroutines,
    bench_spawn_single
);
criterion_main!(benches);
