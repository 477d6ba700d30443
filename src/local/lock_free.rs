//! Lock-free state holder built on compare-and-swap of an `Arc`.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::trace;

use super::StateHolder;
use crate::remote_state::RemoteBucketState;

/// State published through `ArcSwap`.
///
/// Writers clone the observed state, apply the operation and swap the result in only if
/// nobody else published in between; otherwise they retry against the newer state.
#[derive(Debug)]
pub struct LockFreeState {
    current: ArcSwap<RemoteBucketState>,
}

impl StateHolder for LockFreeState {
    fn new(state: RemoteBucketState) -> Self {
        Self { current: ArcSwap::from_pointee(state) }
    }

    fn read<R>(&self, f: impl FnOnce(&RemoteBucketState) -> R) -> R {
        f(&self.current.load())
    }

    fn update<R>(&self, mut f: impl FnMut(&mut RemoteBucketState) -> (R, bool)) -> R {
        let mut conflicts = 0u32;
        loop {
            let observed = self.current.load_full();
            let mut next = RemoteBucketState::clone(&observed);
            let (result, commit) = f(&mut next);
            if !commit {
                return result;
            }
            let previous = self.current.compare_and_swap(&observed, Arc::new(next));
            if Arc::ptr_eq(&*previous, &observed) {
                return result;
            }
            conflicts += 1;
            trace!(conflicts, "lost compare-and-swap race, retrying");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bandwidth::Bandwidth;
    use crate::clock::ManualClock;
    use crate::config::BucketConfiguration;
    use crate::local::LocalBucket;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    #[test]
    fn concurrent_consumers_never_overdraw() {
        let config = BucketConfiguration::single(Bandwidth::simple(10, Duration::from_secs(3600)).unwrap());
        let bucket = Arc::new(LocalBucket::builder(config).clock(ManualClock::new(0)).lock_free().unwrap());
        let barrier = Arc::new(Barrier::new(50));
        let successes = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let bucket = bucket.clone();
                let barrier = barrier.clone();
                let successes = successes.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    if bucket.try_consume(1).unwrap() {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(successes.load(Ordering::SeqCst), 10);
        assert_eq!(bucket.available_tokens(), 0);
        assert_eq!(bucket.snapshot().consumed_tokens(), 10);
    }
}
