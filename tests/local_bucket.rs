mod common;

use std::sync::Arc;
use std::time::Duration;

use common::simple_config;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokenwell::{Bandwidth, BucketConfiguration, LocalBucket, ManualClock};

#[test]
fn lock_free_bucket_grants_exactly_capacity_across_threads() {
    let bucket = Arc::new(
        LocalBucket::builder(simple_config(10, Duration::from_secs(60)))
            .clock(ManualClock::new(0))
            .lock_free()
            .unwrap(),
    );
    let granted: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let bucket = bucket.clone();
                scope.spawn(move || bucket.try_consume(1).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).filter(|granted| *granted).count()
    });
    assert_eq!(granted, 10);
    assert_eq!(bucket.available_tokens(), 0);
}

#[test]
fn locked_and_lock_free_buckets_agree_on_random_workloads() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let config = BucketConfiguration::new(vec![
        Bandwidth::greedy(50, 7, Duration::from_millis(300)).unwrap(),
        Bandwidth::intervally(20, 20, Duration::from_secs(1)).unwrap(),
    ])
    .unwrap();
    let clock = ManualClock::new(0);
    let lock_free = LocalBucket::builder(config.clone()).clock(clock.clone()).lock_free().unwrap();
    let locked = LocalBucket::builder(config).clock(clock.clone()).locked().unwrap();

    for _ in 0..2_000 {
        clock.advance_nanos(rng.random_range(0..50_000_000));
        let tokens = rng.random_range(1..=8);
        match rng.random_range(0..4) {
            0 => assert_eq!(lock_free.try_consume(tokens).unwrap(), locked.try_consume(tokens).unwrap()),
            1 => assert_eq!(
                lock_free.consume_as_much_as_possible(tokens).unwrap(),
                locked.consume_as_much_as_possible(tokens).unwrap()
            ),
            2 => assert_eq!(
                lock_free.estimate_ability_to_consume(tokens).unwrap(),
                locked.estimate_ability_to_consume(tokens).unwrap()
            ),
            _ => {
                lock_free.add_tokens(tokens).unwrap();
                locked.add_tokens(tokens).unwrap();
            }
        }
        let available = lock_free.available_tokens();
        assert_eq!(available, locked.available_tokens());
        assert!((0..=20).contains(&available));
    }
    assert_eq!(lock_free.snapshot(), locked.snapshot());
}
