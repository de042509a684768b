//! Throughput of `execute` under a warm, steady-state pool. Mirrors the
//! teacher's `criterion`-based search-throughput benches in shape: a fixed
//! warmed-up subject, a tight submit loop, no I/O.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use elastic_pool::{PoolConfig, ThreadPool};

fn warmed_pool(min_threads: u32, max_threads: u32) -> ThreadPool {
    let mut cfg = PoolConfig::default();
    cfg.set_min_threads(min_threads);
    cfg.set_max_threads(max_threads).unwrap();
    cfg.set_idle_timeout_millis(60_000);
    let pool = ThreadPool::new(cfg).unwrap();
    pool.start().unwrap();
    pool
}

fn bench_submit_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute_throughput");

    for &worker_count in &[4u32, 16, 64] {
        let pool = warmed_pool(worker_count, worker_count);
        group.throughput(Throughput::Elements(1000));
        group.bench_with_input(
            BenchmarkId::from_parameter(worker_count),
            &worker_count,
            |b, _| {
                b.iter(|| {
                    let completed = Arc::new(AtomicUsize::new(0));
                    for _ in 0..1000 {
                        let completed = completed.clone();
                        pool.execute(move || {
                            completed.fetch_add(1, Ordering::Relaxed);
                        })
                        .unwrap();
                    }
                    while completed.load(Ordering::Relaxed) < 1000 {
                        std::thread::yield_now();
                    }
                });
            },
        );
        pool.stop(Duration::from_secs(5)).unwrap();
        pool.join();
    }

    group.finish();
}

criterion_group!(benches, bench_submit_throughput);
criterion_main!(benches);
