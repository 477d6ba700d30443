//! Mutex-guarded state holder.

use std::sync::Mutex;

use super::StateHolder;
use crate::remote_state::RemoteBucketState;

/// State guarded by a mutex.
///
/// Operations run in place under the lock. A failed operation has only refilled, which
/// leaves the observable state unchanged, so nothing needs rolling back.
#[derive(Debug)]
pub struct LockedState {
    current: Mutex<RemoteBucketState>,
}

impl LockedState {
    fn lock(&self) -> std::sync::MutexGuard<'_, RemoteBucketState> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateHolder for LockedState {
    fn new(state: RemoteBucketState) -> Self {
        Self { current: Mutex::new(state) }
    }

    fn read<R>(&self, f: impl FnOnce(&RemoteBucketState) -> R) -> R {
        f(&self.lock())
    }

    fn update<R>(&self, mut f: impl FnMut(&mut RemoteBucketState) -> (R, bool)) -> R {
        f(&mut self.lock()).0
    }
}
