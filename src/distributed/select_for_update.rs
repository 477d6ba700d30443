//! Pessimistic backend over row locks (`SELECT ... FOR UPDATE` style).

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::backend::{apply, Backend, BucketKey};
use super::settings::ClientSideConfig;
use crate::command::{CommandResult, RemoteCommand};
use crate::error::ExecutionError;
use crate::remote_state::RemoteBucketState;
use crate::timeout::with_timeout;

/// Outcome of [`SelectForUpdateTransaction::try_lock_and_get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockAndGetResult {
    /// Whether a row existed and is now locked by this transaction.
    pub locked: bool,
    /// Stored blob; `None` (or empty) for a row that holds no bucket yet.
    pub data: Option<Vec<u8>>,
}

impl LockAndGetResult {
    pub fn not_locked() -> Self {
        Self { locked: false, data: None }
    }

    pub fn locked(data: Option<Vec<u8>>) -> Self {
        Self { locked: true, data }
    }
}

/// One storage transaction over a single key.
#[async_trait]
pub trait SelectForUpdateTransaction: Send {
    async fn begin(&mut self, timeout: Option<Duration>) -> Result<(), ExecutionError>;

    /// Lock the row and read it. A missing row cannot be locked.
    async fn try_lock_and_get(&mut self, timeout: Option<Duration>) -> Result<LockAndGetResult, ExecutionError>;

    /// Insert an empty row so the next attempt has something to lock. Returns `false` when
    /// the row already existed.
    async fn try_insert_empty_data(&mut self, timeout: Option<Duration>) -> Result<bool, ExecutionError>;

    async fn update(
        &mut self,
        data: &[u8],
        new_state: &RemoteBucketState,
        expires_at_millis: Option<i64>,
        timeout: Option<Duration>,
    ) -> Result<(), ExecutionError>;

    async fn commit(&mut self, timeout: Option<Duration>) -> Result<(), ExecutionError>;

    async fn rollback(&mut self) -> Result<(), ExecutionError>;

    /// Return connections and locks. Called exactly once, whatever happened before.
    async fn release(&mut self);
}

#[async_trait]
pub trait SelectForUpdateStorage<K: BucketKey>: Send + Sync {
    type Transaction: SelectForUpdateTransaction;

    fn allocate_transaction(&self, key: &K) -> Self::Transaction;

    async fn remove(&self, key: &K) -> Result<(), ExecutionError>;

    fn is_expire_after_write_supported(&self) -> bool {
        false
    }

    async fn remove_expired(&self, _batch_size: usize) -> Result<usize, ExecutionError> {
        Err(ExecutionError::Unsupported("remove_expired"))
    }
}

/// [`Backend`] over a [`SelectForUpdateStorage`].
#[derive(Debug)]
pub struct SelectForUpdateBackend<S> {
    storage: S,
    config: ClientSideConfig,
}

enum Attempt {
    Done(CommandResult),
    Retry,
}

impl<S> SelectForUpdateBackend<S> {
    pub fn new(storage: S, config: ClientSideConfig) -> Self {
        Self { storage, config }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    async fn attempt<T: SelectForUpdateTransaction>(
        &self,
        transaction: &mut T,
        command: &RemoteCommand,
        timeout: Option<Duration>,
    ) -> Result<Attempt, ExecutionError> {
        transaction.begin(timeout).await?;
        let locked = transaction.try_lock_and_get(timeout).await?;
        if !locked.locked {
            let inserted = transaction.try_insert_empty_data(timeout).await?;
            transaction.commit(timeout).await?;
            debug!(inserted, "row was missing, retrying after insert");
            return Ok(Attempt::Retry);
        }

        let (result, update) = apply(command, locked.data.as_deref(), &self.config)?;
        if let Some(update) = update {
            transaction.update(&update.data, &update.state, update.expires_at_millis, timeout).await?;
        }
        transaction.commit(timeout).await?;
        Ok(Attempt::Done(result))
    }

    async fn attempts<T: SelectForUpdateTransaction>(
        &self,
        transaction: &mut T,
        command: &RemoteCommand,
    ) -> Result<CommandResult, ExecutionError> {
        let timeout = self.config.request_timeout().map(|t| t.duration());
        loop {
            if let Attempt::Done(result) = self.attempt(transaction, command, timeout).await? {
                return Ok(result);
            }
        }
    }

    /// Rolls back on any error, including an expired request timeout.
    async fn run<T: SelectForUpdateTransaction>(
        &self,
        transaction: &mut T,
        command: &RemoteCommand,
    ) -> Result<CommandResult, ExecutionError> {
        let outcome = with_timeout(self.config.request_timeout(), self.attempts(transaction, command)).await;
        if let Err(err) = &outcome {
            warn!(error = %err, "select-for-update transaction failed, rolling back");
            if let Err(rollback) = transaction.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
        }
        outcome
    }
}

#[async_trait]
impl<K, S> Backend<K> for SelectForUpdateBackend<S>
where
    K: BucketKey,
    S: SelectForUpdateStorage<K>,
{
    async fn execute(&self, key: &K, command: RemoteCommand) -> Result<CommandResult, ExecutionError> {
        let mut transaction = self.storage.allocate_transaction(key);
        let outcome = self.run(&mut transaction, &command).await;
        transaction.release().await;
        outcome
    }

    async fn remove(&self, key: &K) -> Result<(), ExecutionError> {
        with_timeout(self.config.request_timeout(), self.storage.remove(key)).await
    }

    fn is_expire_after_write_supported(&self) -> bool {
        self.storage.is_expire_after_write_supported()
    }

    async fn remove_expired(&self, batch_size: usize) -> Result<usize, ExecutionError> {
        self.storage.remove_expired(batch_size).await
    }
}
