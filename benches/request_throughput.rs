//! Request submission throughput benchmarks.
//!
//! Measures end-to-end latency of reads and writes through the manager,
//! with and without the timeout pool.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use request_core::{RequestManager, RequestManagerConfig};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn configs() -> [(&'static str, RequestManagerConfig); 2] {
    [
        ("no_timeout", RequestManagerConfig::default()),
        ("timeout", RequestManagerConfig::with_timeout(Duration::from_secs(30))),
    ]
}

fn bench_reads(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("reads");

    for (name, config) in configs() {
        let manager = rt.block_on(async { RequestManager::new(config).unwrap() });
        let manager = &manager;
        for batch in [1_usize, 16] {
            group.throughput(Throughput::Elements(batch as u64));
            group.bench_function(BenchmarkId::new(name, batch), |b| {
                b.to_async(&rt).iter(move || async move {
                    let handles: Vec<_> = (0..batch)
                        .map(|i| manager.run_read(move |_| Ok(black_box(i))))
                        .collect();
                    for handle in handles {
                        black_box(handle.await.unwrap());
                    }
                })
            });
        }
    }

    group.finish();
}

fn bench_mixed(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("mixed_read_write");
    let manager = rt.block_on(async { RequestManager::new(RequestManagerConfig::default()).unwrap() });
    let manager = &manager;

    group.throughput(Throughput::Elements(16));
    group.bench_function("one_write_per_15_reads", |b| {
        b.to_async(&rt).iter(move || async move {
            let write = manager.run_write(|| Ok(1_u64), |_, n| Ok(n + 1));
            let reads: Vec<_> = (0..15_u64).map(|i| manager.run_read(move |_| Ok(i))).collect();
            black_box(write.await.unwrap());
            for read in reads {
                black_box(read.await.unwrap());
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_reads, bench_mixed);
criterion_main!(benches);
