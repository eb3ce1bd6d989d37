//! Scheduling throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use delay::{BatchWindower, KeyedDebouncer};
use std::time::Duration;

fn bench_keyed(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let debouncer = KeyedDebouncer::new_in(
        runtime.handle().clone(),
        |payload: u64| {
            black_box(payload);
        },
        Duration::from_secs(60),
        4096,
    )
    .unwrap();

    c.bench_function("register_cancel", |b| {
        let mut key = 0u64;
        b.iter(|| {
            key = (key + 1) % 1024;
            debouncer.register(key, key);
            debouncer.cancel(&key)
        });
    });

    c.bench_function("register_replace", |b| {
        b.iter(|| debouncer.register(black_box(7), 7));
    });

    runtime.block_on(debouncer.stop());
}

fn bench_window(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let windower = BatchWindower::new_in(
        runtime.handle().clone(),
        |item: u64| {
            black_box(item);
        },
        1024,
        Duration::from_millis(50),
        Duration::from_secs(60),
    )
    .unwrap();
    windower.start();

    c.bench_function("exec_flush_64", |b| {
        b.iter(|| {
            for item in 0..64 {
                windower.exec(item);
            }
            windower.flush()
        });
    });

    runtime.block_on(windower.stop());
}

criterion_group!(benches, bench_keyed, bench_window);
criterion_main!(benches);
