use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Duration;

use tokenwell::distributed::{InMemoryCasStorage, ProxyManager};
use tokenwell::{
    Bandwidth, BucketConfiguration, DelayParameters, LocalBucket, ManualClock, Optimization,
};

fn config() -> BucketConfiguration {
    // Large enough that the benchmark never runs dry.
    BucketConfiguration::single(Bandwidth::simple(i64::MAX / 4, Duration::from_secs(1)).unwrap())
}

fn local_try_consume(c: &mut Criterion) {
    let lock_free = LocalBucket::builder(config()).lock_free().unwrap();
    let locked = LocalBucket::builder(config()).locked().unwrap();

    c.bench_function("local_lock_free_try_consume", |b| {
        b.iter(|| black_box(lock_free.try_consume(black_box(1)).unwrap()));
    });
    c.bench_function("local_locked_try_consume", |b| {
        b.iter(|| black_box(locked.try_consume(black_box(1)).unwrap()));
    });
}

fn contended_lock_free(c: &mut Criterion) {
    let bucket = Arc::new(LocalBucket::builder(config()).lock_free().unwrap());

    c.bench_function("local_lock_free_4_threads", |b| {
        b.iter(|| {
            std::thread::scope(|scope| {
                for _ in 0..4 {
                    let bucket = bucket.clone();
                    scope.spawn(move || {
                        for _ in 0..100 {
                            black_box(bucket.try_consume(1).unwrap());
                        }
                    });
                }
            });
        });
    });
}

fn proxied_try_consume(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let clock = ManualClock::new(0);
    let manager = ProxyManager::<u64>::builder()
        .clock(Arc::new(clock.clone()))
        .compare_and_swap(InMemoryCasStorage::new(Arc::new(clock)));
    let plain = manager.proxy(1).configuration(config()).build().unwrap();
    let delay = DelayParameters::new(1_000, Duration::from_secs(1)).unwrap();
    let delayed = manager.proxy(2).configuration(config()).optimization(Optimization::Delaying(delay)).build().unwrap();

    c.bench_function("proxy_cas_try_consume", |b| {
        b.to_async(&rt).iter(|| async { black_box(plain.try_consume(1).await.unwrap()) });
    });
    c.bench_function("proxy_delayed_try_consume", |b| {
        b.to_async(&rt).iter(|| async { black_box(delayed.try_consume(1).await.unwrap()) });
    });
}

criterion_group!(benches, local_try_consume, contended_lock_free, proxied_try_consume);
criterion_main!(benches);
