//! Pessimistic backend over advisory (application-level) locks.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::backend::{apply, Backend, BucketKey};
use super::settings::ClientSideConfig;
use crate::command::{CommandResult, RemoteCommand};
use crate::error::ExecutionError;
use crate::remote_state::RemoteBucketState;
use crate::timeout::with_timeout;

/// One storage transaction holding an advisory lock on a key.
#[async_trait]
pub trait AdvisoryLockTransaction: Send {
    async fn begin(&mut self, timeout: Option<Duration>) -> Result<(), ExecutionError>;

    /// Take the key's lock (waiting if needed) and read the blob, if any.
    async fn lock_and_get(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>, ExecutionError>;

    async fn create(
        &mut self,
        data: &[u8],
        new_state: &RemoteBucketState,
        expires_at_millis: Option<i64>,
        timeout: Option<Duration>,
    ) -> Result<(), ExecutionError>;

    async fn update(
        &mut self,
        data: &[u8],
        new_state: &RemoteBucketState,
        expires_at_millis: Option<i64>,
        timeout: Option<Duration>,
    ) -> Result<(), ExecutionError>;

    async fn unlock(&mut self) -> Result<(), ExecutionError>;

    async fn commit(&mut self, timeout: Option<Duration>) -> Result<(), ExecutionError>;

    async fn rollback(&mut self) -> Result<(), ExecutionError>;

    /// Called exactly once, whatever happened before.
    async fn release(&mut self);
}

#[async_trait]
pub trait AdvisoryLockStorage<K: BucketKey>: Send + Sync {
    type Transaction: AdvisoryLockTransaction;

    fn allocate_transaction(&self, key: &K) -> Self::Transaction;

    async fn remove(&self, key: &K) -> Result<(), ExecutionError>;

    fn is_expire_after_write_supported(&self) -> bool {
        false
    }

    async fn remove_expired(&self, _batch_size: usize) -> Result<usize, ExecutionError> {
        Err(ExecutionError::Unsupported("remove_expired"))
    }
}

/// [`Backend`] over an [`AdvisoryLockStorage`].
#[derive(Debug)]
pub struct AdvisoryLockBackend<S> {
    storage: S,
    config: ClientSideConfig,
}

impl<S> AdvisoryLockBackend<S> {
    pub fn new(storage: S, config: ClientSideConfig) -> Self {
        Self { storage, config }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    async fn attempt<T: AdvisoryLockTransaction>(
        &self,
        transaction: &mut T,
        command: &RemoteCommand,
    ) -> Result<CommandResult, ExecutionError> {
        let timeout = self.config.request_timeout().map(|t| t.duration());
        transaction.begin(timeout).await?;
        let stored = transaction.lock_and_get(timeout).await?;
        let (result, update) = apply(command, stored.as_deref(), &self.config)?;
        if let Some(update) = update {
            let exists = stored.as_ref().is_some_and(|data| !data.is_empty());
            if exists {
                transaction.update(&update.data, &update.state, update.expires_at_millis, timeout).await?;
            } else {
                transaction.create(&update.data, &update.state, update.expires_at_millis, timeout).await?;
            }
        }
        transaction.unlock().await?;
        transaction.commit(timeout).await?;
        Ok(result)
    }

    /// Rolls back on any error, including an expired request timeout.
    async fn run<T: AdvisoryLockTransaction>(
        &self,
        transaction: &mut T,
        command: &RemoteCommand,
    ) -> Result<CommandResult, ExecutionError> {
        let outcome = with_timeout(self.config.request_timeout(), self.attempt(transaction, command)).await;
        if let Err(err) = &outcome {
            warn!(error = %err, "advisory-lock transaction failed, rolling back");
            if let Err(rollback) = transaction.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
        }
        outcome
    }
}

#[async_trait]
impl<K, S> Backend<K> for AdvisoryLockBackend<S>
where
    K: BucketKey,
    S: AdvisoryLockStorage<K>,
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
