//! Optimistic backend: read, execute locally, swap if unchanged, retry otherwise.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::backend::{apply, Backend, BucketKey};
use super::settings::ClientSideConfig;
use crate::command::{CommandResult, RemoteCommand};
use crate::error::ExecutionError;
use crate::remote_state::RemoteBucketState;
use crate::timeout::with_timeout;

/// One read-then-swap attempt against a single key.
#[async_trait]
pub trait CompareAndSwapOperation: Send {
    /// Current blob, or `None` when the bucket does not exist.
    async fn get_state_data(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>, ExecutionError>;

    /// Store `new_data` only if the stored blob still equals `original`.
    ///
    /// Returns `false` when someone else wrote first. `new_state` is the decoded form of
    /// `new_data`, for storages that index fields of it.
    async fn compare_and_swap(
        &mut self,
        original: Option<&[u8]>,
        new_data: &[u8],
        new_state: &RemoteBucketState,
        expires_at_millis: Option<i64>,
        timeout: Option<Duration>,
    ) -> Result<bool, ExecutionError>;
}

/// Storage with an atomic compare-and-swap on whole blobs.
#[async_trait]
pub trait CompareAndSwapStorage<K: BucketKey>: Send + Sync {
    type Operation: CompareAndSwapOperation;

    fn begin_operation(&self, key: &K) -> Self::Operation;

    async fn remove(&self, key: &K) -> Result<(), ExecutionError>;

    fn is_expire_after_write_supported(&self) -> bool {
        false
    }

    async fn remove_expired(&self, _batch_size: usize) -> Result<usize, ExecutionError> {
        Err(ExecutionError::Unsupported("remove_expired"))
    }
}

/// [`Backend`] over a [`CompareAndSwapStorage`].
///
/// The retry loop has no attempt limit; a configured request timeout bounds the whole call.
#[derive(Debug)]
pub struct CompareAndSwapBackend<S> {
    storage: S,
    config: ClientSideConfig,
}

impl<S> CompareAndSwapBackend<S> {
    pub fn new(storage: S, config: ClientSideConfig) -> Self {
        Self { storage, config }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }
}

impl<S> CompareAndSwapBackend<S> {
    async fn execute_with_retries<K>(&self, key: &K, command: &RemoteCommand) -> Result<CommandResult, ExecutionError>
    where
        K: BucketKey,
        S: CompareAndSwapStorage<K>,
    {
        let timeout = self.config.request_timeout().map(|t| t.duration());
        let mut attempt = 0u64;
        loop {
            attempt += 1;
            let mut operation = self.storage.begin_operation(key);
            let original = operation.get_state_data(timeout).await?;
            let (result, update) = apply(command, original.as_deref(), &self.config)?;
            let Some(update) = update else {
                return Ok(result);
            };
            let swapped = operation
                .compare_and_swap(
                    original.as_deref(),
                    &update.data,
                    &update.state,
                    update.expires_at_millis,
                    timeout,
                )
                .await?;
            if swapped {
                return Ok(result);
            }
            debug!(?key, attempt, "compare-and-swap conflict, retrying");
        }
    }
}

#[async_trait]
impl<K, S> Backend<K> for CompareAndSwapBackend<S>
where
    K: BucketKey,
    S: CompareAndSwapStorage<K>,
{
    async fn execute(&self, key: &K, command: RemoteCommand) -> Result<CommandResult, ExecutionError> {
        with_timeout(self.config.request_timeout(), self.execute_with_retries(key, &command)).await
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
