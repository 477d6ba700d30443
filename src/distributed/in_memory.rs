//! In-memory storages for tests and single-process deployments.
//!
//! [`InMemoryCasStorage`] implements [`CompareAndSwapStorage`]; [`InMemoryLockStorage`]
//! implements both lock-based storage traits. Both honour expiration times and can inject
//! write failures so that backend error paths can be exercised.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use super::advisory_lock::{AdvisoryLockStorage, AdvisoryLockTransaction};
use super::backend::BucketKey;
use super::compare_and_swap::{CompareAndSwapOperation, CompareAndSwapStorage};
use super::select_for_update::{LockAndGetResult, SelectForUpdateStorage, SelectForUpdateTransaction};
use crate::clock::Clock;
use crate::error::ExecutionError;
use crate::remote_state::RemoteBucketState;
use crate::serialization::decode_state;

const NANOS_PER_MILLI: i64 = 1_000_000;

#[derive(Debug, Clone)]
struct Row {
    data: Option<Vec<u8>>,
    expires_at_millis: Option<i64>,
}

impl Row {
    fn is_expired(&self, now_millis: i64) -> bool {
        self.expires_at_millis.is_some_and(|at| at <= now_millis)
    }
}

/// Rows plus the clock that decides which of them are expired.
struct Table<K> {
    rows: Mutex<HashMap<K, Row>>,
    clock: Arc<dyn Clock>,
    failures: AtomicUsize,
    write_delay_millis: AtomicU64,
}

impl<K: BucketKey> Table<K> {
    fn new(clock: Arc<dyn Clock>) -> Self {
        Self { rows: Mutex::new(HashMap::new()), clock, failures: AtomicUsize::new(0), write_delay_millis: AtomicU64::new(0) }
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<K, Row>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn now_millis(&self) -> i64 {
        self.clock.now_nanos() / NANOS_PER_MILLI
    }

    /// Live row for `key`; expired rows read as absent.
    fn get(&self, key: &K) -> Option<Row> {
        let now = self.now_millis();
        self.rows().get(key).filter(|row| !row.is_expired(now)).cloned()
    }

    fn state(&self, key: &K) -> Option<RemoteBucketState> {
        self.get(key)?.data.and_then(|data| decode_state(&data).ok())
    }

    fn remove(&self, key: &K) {
        self.rows().remove(key);
    }

    fn remove_expired(&self, batch_size: usize) -> usize {
        let now = self.now_millis();
        let mut rows = self.rows();
        let expired: Vec<K> = rows
            .iter()
            .filter(|(_, row)| row.is_expired(now))
            .map(|(key, _)| key.clone())
            .take(batch_size)
            .collect();
        for key in &expired {
            rows.remove(key);
        }
        expired.len()
    }

    async fn stall(&self) {
        let millis = self.write_delay_millis.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    fn check_failure(&self, operation: &'static str) -> Result<(), ExecutionError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ExecutionError::backend_message(format!("injected {} failure", operation)));
        }
        Ok(())
    }
}

/// Compare-and-swap storage over a `HashMap`.
pub struct InMemoryCasStorage<K> {
    table: Arc<Table<K>>,
    swaps: Arc<AtomicU64>,
}

impl<K> Clone for InMemoryCasStorage<K> {
    fn clone(&self) -> Self {
        Self { table: self.table.clone(), swaps: self.swaps.clone() }
    }
}

impl<K: BucketKey> fmt::Debug for InMemoryCasStorage<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCasStorage").field("buckets", &self.len()).finish()
    }
}

impl<K: BucketKey> InMemoryCasStorage<K> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { table: Arc::new(Table::new(clock)), swaps: Arc::new(AtomicU64::new(0)) }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.table.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.table.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decoded state of `key`, if present and not expired.
    pub fn state(&self, key: &K) -> Option<RemoteBucketState> {
        self.table.state(key)
    }

    pub fn expires_at_millis(&self, key: &K) -> Option<i64> {
        self.table.get(key)?.expires_at_millis
    }

    /// Make the next `count` writes fail.
    pub fn fail_next(&self, count: usize) {
        self.table.failures.store(count, Ordering::SeqCst);
    }

    /// Swaps that won.
    pub fn successful_swaps(&self) -> u64 {
        self.swaps.load(Ordering::SeqCst)
    }
}

/// Operation handle of [`InMemoryCasStorage`].
pub struct InMemoryCasOperation<K> {
    key: K,
    storage: InMemoryCasStorage<K>,
}

#[async_trait]
impl<K: BucketKey> CompareAndSwapOperation for InMemoryCasOperation<K> {
    async fn get_state_data(&mut self, _timeout: Option<Duration>) -> Result<Option<Vec<u8>>, ExecutionError> {
        // Give concurrent operations a chance to interleave between read and swap.
        tokio::task::yield_now().await;
        Ok(self.storage.table.get(&self.key).and_then(|row| row.data))
    }

    async fn compare_and_swap(
        &mut self,
        original: Option<&[u8]>,
        new_data: &[u8],
        _new_state: &RemoteBucketState,
        expires_at_millis: Option<i64>,
        _timeout: Option<Duration>,
    ) -> Result<bool, ExecutionError> {
        self.storage.table.check_failure("compare-and-swap")?;
        let table = &self.storage.table;
        let now = table.now_millis();
        let mut rows = table.rows();
        let current = rows.get(&self.key).filter(|row| !row.is_expired(now)).and_then(|row| row.data.as_deref());
        if current != original {
            return Ok(false);
        }
        rows.insert(self.key.clone(), Row { data: Some(new_data.to_vec()), expires_at_millis });
        self.storage.swaps.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[async_trait]
impl<K: BucketKey> CompareAndSwapStorage<K> for InMemoryCasStorage<K> {
    type Operation = InMemoryCasOperation<K>;

    fn begin_operation(&self, key: &K) -> Self::Operation {
        InMemoryCasOperation { key: key.clone(), storage: self.clone() }
    }

    async fn remove(&self, key: &K) -> Result<(), ExecutionError> {
        self.table.remove(key);
        Ok(())
    }

    fn is_expire_after_write_supported(&self) -> bool {
        true
    }

    async fn remove_expired(&self, batch_size: usize) -> Result<usize, ExecutionError> {
        Ok(self.table.remove_expired(batch_size))
    }
}

/// Transaction counters of an [`InMemoryLockStorage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionStats {
    pub commits: u64,
    pub rollbacks: u64,
    pub releases: u64,
}

struct LockShared<K> {
    table: Table<K>,
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    releases: AtomicU64,
}

impl<K: BucketKey> LockShared<K> {
    fn lock_for(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key.clone())
            .or_default()
            .clone()
    }
}

/// Storage with per-key locks and transactional writes, usable by both the
/// select-for-update and the advisory-lock backends.
pub struct InMemoryLockStorage<K> {
    shared: Arc<LockShared<K>>,
}

impl<K> Clone for InMemoryLockStorage<K> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<K: BucketKey> fmt::Debug for InMemoryLockStorage<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryLockStorage").field("stats", &self.stats()).finish()
    }
}

impl<K: BucketKey> InMemoryLockStorage<K> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(LockShared {
                table: Table::new(clock),
                locks: Mutex::new(HashMap::new()),
                commits: AtomicU64::new(0),
                rollbacks: AtomicU64::new(0),
                releases: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self, key: &K) -> Option<RemoteBucketState> {
        self.shared.table.state(key)
    }

    pub fn expires_at_millis(&self, key: &K) -> Option<i64> {
        self.shared.table.get(key)?.expires_at_millis
    }

    /// Make the next `count` writes fail.
    pub fn fail_next(&self, count: usize) {
        self.shared.table.failures.store(count, Ordering::SeqCst);
    }

    /// Delay every transactional write by `delay`.
    pub fn stall_writes(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.shared.table.write_delay_millis.store(millis, Ordering::SeqCst);
    }

    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            commits: self.shared.commits.load(Ordering::SeqCst),
            rollbacks: self.shared.rollbacks.load(Ordering::SeqCst),
            releases: self.shared.releases.load(Ordering::SeqCst),
        }
    }

    fn transaction(&self, key: &K) -> InMemoryTransaction<K> {
        InMemoryTransaction {
            key: key.clone(),
            shared: self.shared.clone(),
            guard: None,
            pending: None,
            insert_empty: false,
        }
    }
}

/// Transaction of an [`InMemoryLockStorage`].
///
/// Writes are buffered until commit. The key lock is held until commit or rollback when
/// writes are pending, so an early unlock never exposes uncommitted data.
pub struct InMemoryTransaction<K> {
    key: K,
    shared: Arc<LockShared<K>>,
    guard: Option<OwnedMutexGuard<()>>,
    pending: Option<Row>,
    insert_empty: bool,
}

impl<K: BucketKey> InMemoryTransaction<K> {
    fn start(&mut self) {
        self.pending = None;
        self.insert_empty = false;
    }

    async fn acquire(&mut self) {
        if self.guard.is_none() {
            let lock = self.shared.lock_for(&self.key);
            self.guard = Some(lock.lock_owned().await);
        }
    }

    async fn write(&mut self, data: &[u8], expires_at_millis: Option<i64>) -> Result<(), ExecutionError> {
        self.shared.table.stall().await;
        self.shared.table.check_failure("write")?;
        self.pending = Some(Row { data: Some(data.to_vec()), expires_at_millis });
        Ok(())
    }

    fn finish_commit(&mut self) {
        let now = self.shared.table.now_millis();
        let mut rows = self.shared.table.rows();
        if let Some(row) = self.pending.take() {
            rows.insert(self.key.clone(), row);
        } else if std::mem::take(&mut self.insert_empty) {
            // An expired row that was not swept yet counts as absent and is replaced.
            let live = rows.get(&self.key).is_some_and(|row| !row.is_expired(now));
            if !live {
                rows.insert(self.key.clone(), Row { data: None, expires_at_millis: None });
            }
        }
        drop(rows);
        self.guard = None;
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
    }

    fn finish_rollback(&mut self) {
        self.pending = None;
        self.insert_empty = false;
        self.guard = None;
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
    }

    fn finish_release(&mut self) {
        self.guard = None;
        self.shared.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<K: BucketKey> SelectForUpdateTransaction for InMemoryTransaction<K> {
    async fn begin(&mut self, _timeout: Option<Duration>) -> Result<(), ExecutionError> {
        self.start();
        Ok(())
    }

    async fn try_lock_and_get(&mut self, _timeout: Option<Duration>) -> Result<LockAndGetResult, ExecutionError> {
        self.acquire().await;
        match self.shared.table.get(&self.key) {
            Some(row) => Ok(LockAndGetResult::locked(row.data)),
            None => {
                self.guard = None;
                Ok(LockAndGetResult::not_locked())
            }
        }
    }

    async fn try_insert_empty_data(&mut self, _timeout: Option<Duration>) -> Result<bool, ExecutionError> {
        let absent = self.shared.table.get(&self.key).is_none();
        self.insert_empty = absent;
        Ok(absent)
    }

    async fn update(
        &mut self,
        data: &[u8],
        _new_state: &RemoteBucketState,
        expires_at_millis: Option<i64>,
        _timeout: Option<Duration>,
    ) -> Result<(), ExecutionError> {
        self.write(data, expires_at_millis).await
    }

    async fn commit(&mut self, _timeout: Option<Duration>) -> Result<(), ExecutionError> {
        self.finish_commit();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ExecutionError> {
        self.finish_rollback();
        Ok(())
    }

    async fn release(&mut self) {
        self.finish_release();
    }
}

#[async_trait]
impl<K: BucketKey> AdvisoryLockTransaction for InMemoryTransaction<K> {
    async fn begin(&mut self, _timeout: Option<Duration>) -> Result<(), ExecutionError> {
        self.start();
        Ok(())
    }

    async fn lock_and_get(&mut self, _timeout: Option<Duration>) -> Result<Option<Vec<u8>>, ExecutionError> {
        self.acquire().await;
        Ok(self.shared.table.get(&self.key).and_then(|row| row.data))
    }

    async fn create(
        &mut self,
        data: &[u8],
        _new_state: &RemoteBucketState,
        expires_at_millis: Option<i64>,
        _timeout: Option<Duration>,
    ) -> Result<(), ExecutionError> {
        self.write(data, expires_at_millis).await
    }

    async fn update(
        &mut self,
        data: &[u8],
        _new_state: &RemoteBucketState,
        expires_at_millis: Option<i64>,
        _timeout: Option<Duration>,
    ) -> Result<(), ExecutionError> {
        self.write(data, expires_at_millis).await
    }

    async fn unlock(&mut self) -> Result<(), ExecutionError> {
        if self.pending.is_none() {
            self.guard = None;
        }
        Ok(())
    }

    async fn commit(&mut self, _timeout: Option<Duration>) -> Result<(), ExecutionError> {
        self.finish_commit();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ExecutionError> {
        self.finish_rollback();
        Ok(())
    }

    async fn release(&mut self) {
        self.finish_release();
    }
}

#[async_trait]
impl<K: BucketKey> SelectForUpdateStorage<K> for InMemoryLockStorage<K> {
    type Transaction = InMemoryTransaction<K>;

    fn allocate_transaction(&self, key: &K) -> Self::Transaction {
        self.transaction(key)
    }

    async fn remove(&self, key: &K) -> Result<(), ExecutionError> {
        self.shared.table.remove(key);
        Ok(())
    }

    fn is_expire_after_write_supported(&self) -> bool {
        true
    }

    async fn remove_expired(&self, batch_size: usize) -> Result<usize, ExecutionError> {
        Ok(self.shared.table.remove_expired(batch_size))
    }
}

#[async_trait]
impl<K: BucketKey> AdvisoryLockStorage<K> for InMemoryLockStorage<K> {
    type Transaction = InMemoryTransaction<K>;

    fn allocate_transaction(&self, key: &K) -> Self::Transaction {
        self.transaction(key)
    }

    async fn remove(&self, key: &K) -> Result<(), ExecutionError> {
        self.shared.table.remove(key);
        Ok(())
    }

    fn is_expire_after_write_supported(&self) -> bool {
        true
    }

    async fn remove_expired(&self, batch_size: usize) -> Result<usize, ExecutionError> {
        Ok(self.shared.table.remove_expired(batch_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandwidth::Bandwidth;
    use crate::clock::ManualClock;
    use crate::config::BucketConfiguration;
    use crate::serialization::{encode_state, Version};

    fn blob() -> (Vec<u8>, RemoteBucketState) {
        let config = BucketConfiguration::single(Bandwidth::simple(3, Duration::from_secs(1)).unwrap());
        let state = RemoteBucketState::new(config, 0);
        (encode_state(&state, Version::V2).unwrap(), state)
    }

    #[tokio::test]
    async fn swap_requires_unchanged_original() {
        let clock = ManualClock::new(0);
        let storage = InMemoryCasStorage::<u8>::new(Arc::new(clock));
        let (data, state) = blob();

        let mut first = storage.begin_operation(&1);
        let mut second = storage.begin_operation(&1);
        assert_eq!(first.get_state_data(None).await.unwrap(), None);
        assert!(first.compare_and_swap(None, &data, &state, None, None).await.unwrap());
        assert!(!second.compare_and_swap(None, &data, &state, None, None).await.unwrap());
        assert_eq!(storage.successful_swaps(), 1);
        assert_eq!(storage.state(&1), Some(state));
    }

    #[tokio::test]
    async fn expired_rows_disappear_and_are_collected() {
        let clock = ManualClock::new(0);
        let storage = InMemoryCasStorage::<u8>::new(Arc::new(clock.clone()));
        let (data, state) = blob();
        for key in 0..3u8 {
            let mut op = storage.begin_operation(&key);
            op.compare_and_swap(None, &data, &state, Some(10 + i64::from(key)), None).await.unwrap();
        }

        clock.advance(Duration::from_millis(11));
        assert!(!storage.contains(&0));
        assert!(!storage.contains(&1));
        assert!(storage.contains(&2));
        assert_eq!(storage.remove_expired(1).await.unwrap(), 1);
        assert_eq!(storage.remove_expired(10).await.unwrap(), 1);
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn lock_is_held_until_commit() {
        let storage = InMemoryLockStorage::<u8>::new(Arc::new(ManualClock::new(0)));
        let (data, state) = blob();

        let mut writer = AdvisoryLockStorage::allocate_transaction(&storage, &1);
        AdvisoryLockTransaction::begin(&mut writer, None).await.unwrap();
        assert_eq!(writer.lock_and_get(None).await.unwrap(), None);
        writer.create(&data, &state, None, None).await.unwrap();
        writer.unlock().await.unwrap();

        let mut reader = AdvisoryLockStorage::allocate_transaction(&storage, &1);
        let blocked = tokio::time::timeout(Duration::from_millis(20), reader.lock_and_get(None)).await;
        assert!(blocked.is_err(), "reader must wait for the writer's commit");

        AdvisoryLockTransaction::commit(&mut writer, None).await.unwrap();
        let mut reader = AdvisoryLockStorage::allocate_transaction(&storage, &1);
        assert_eq!(reader.lock_and_get(None).await.unwrap(), Some(data));
    }
}
