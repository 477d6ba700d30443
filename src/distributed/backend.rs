//! The seam between bucket proxies and storage primitives.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;

use super::settings::ClientSideConfig;
use crate::command::{BucketEntry, CommandResult, RemoteCommand};
use crate::error::ExecutionError;
use crate::remote_state::RemoteBucketState;
use crate::serialization::{decode_state, encode_state, Versioned};

/// Anything usable as a bucket key.
pub trait BucketKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> BucketKey for T where T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// Executes commands against the stored state of any key.
///
/// Implementations decide how the read-execute-write cycle is made atomic. Every
/// implementation must run [`RemoteCommand::execute`] exactly once per committed attempt.
#[async_trait]
pub trait Backend<K: BucketKey>: Send + Sync {
    async fn execute(&self, key: &K, command: RemoteCommand) -> Result<CommandResult, ExecutionError>;

    async fn remove(&self, key: &K) -> Result<(), ExecutionError>;

    /// Whether the storage drops buckets after their expiration time.
    fn is_expire_after_write_supported(&self) -> bool {
        false
    }

    /// Remove up to `batch_size` expired buckets; returns how many were removed.
    async fn remove_expired(&self, _batch_size: usize) -> Result<usize, ExecutionError> {
        Err(ExecutionError::Unsupported("remove_expired"))
    }
}

/// Executes commands against one bucket.
///
/// Bound to a key by the proxy; optimizers wrap one executor in another.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: RemoteCommand) -> Result<CommandResult, ExecutionError>;
}

/// [`CommandExecutor`] for one key of a [`Backend`].
pub(crate) struct BackendExecutor<K: BucketKey> {
    key: K,
    backend: Arc<dyn Backend<K>>,
}

impl<K: BucketKey> BackendExecutor<K> {
    pub(crate) fn new(key: K, backend: Arc<dyn Backend<K>>) -> Self {
        Self { key, backend }
    }
}

#[async_trait]
impl<K: BucketKey> CommandExecutor for BackendExecutor<K> {
    async fn execute(&self, command: RemoteCommand) -> Result<CommandResult, ExecutionError> {
        self.backend.execute(&self.key, command).await
    }
}

/// New state to persist after a command changed it.
#[derive(Debug)]
pub(crate) struct StateUpdate {
    pub(crate) data: Vec<u8>,
    pub(crate) state: RemoteBucketState,
    pub(crate) expires_at_millis: Option<i64>,
}

/// Decode `stored`, run `command` at the configured clock's `now` and encode the outcome.
pub(crate) fn apply(
    command: &RemoteCommand,
    stored: Option<&[u8]>,
    config: &ClientSideConfig,
) -> Result<(CommandResult, Option<StateUpdate>), ExecutionError> {
    let version = config.backward_compatibility_version();
    command.check_version(version)?;

    let current = stored.filter(|data| !data.is_empty()).map(decode_state).transpose()?;
    let now = config.clock().now_nanos();
    let mut entry = BucketEntry::new(current);
    let result = command.execute(&mut entry, now);
    if !entry.is_modified() {
        return Ok((result, None));
    }
    let update = match entry.into_state() {
        Some(state) => Some(StateUpdate {
            data: encode_state(&state, version)?,
            expires_at_millis: config.expiration().expires_at_millis(&state, now),
            state,
        }),
        None => None,
    };
    Ok((result, update))
}
