#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use tokenwell::distributed::{
    ClientSideConfig, InMemoryCasStorage, InMemoryLockStorage, ProxyManager,
};
use tokenwell::{Bandwidth, BucketConfiguration, Clock, ManualClock};

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn simple_config(capacity: i64, period: Duration) -> BucketConfiguration {
    BucketConfiguration::single(Bandwidth::simple(capacity, period).expect("valid bandwidth"))
}

/// Storage primitives exercised by the distributed tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    CompareAndSwap,
    SelectForUpdate,
    AdvisoryLock,
}

impl Primitive {
    pub const ALL: [Primitive; 3] =
        [Primitive::CompareAndSwap, Primitive::SelectForUpdate, Primitive::AdvisoryLock];
}

pub fn manager(primitive: Primitive, config: ClientSideConfig) -> ProxyManager<String> {
    let clock = config.clock().clone();
    let builder = ProxyManager::builder().config(config);
    match primitive {
        Primitive::CompareAndSwap => builder.compare_and_swap(InMemoryCasStorage::new(clock)),
        Primitive::SelectForUpdate => builder.select_for_update(InMemoryLockStorage::new(clock)),
        Primitive::AdvisoryLock => builder.advisory_lock(InMemoryLockStorage::new(clock)),
    }
}

pub fn manual_config(clock: &ManualClock) -> ClientSideConfig {
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    ClientSideConfig::default().with_clock(clock)
}
