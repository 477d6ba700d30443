//! Buckets whose state lives in shared storage.
//!
//! Storage integrations plug in through one of three primitives:
//!
//! - [`CompareAndSwapStorage`]: read, then write only if the value is unchanged.
//! - [`SelectForUpdateStorage`]: row locks held by a transaction.
//! - [`AdvisoryLockStorage`]: a named lock around plain reads and writes.
//!
//! Each primitive is turned into a [`Backend`] that runs [`RemoteCommand`](crate::command::RemoteCommand)s
//! atomically. [`ProxyManager`] hands out [`BucketProxy`] handles bound to a key.

pub mod advisory_lock;
pub mod backend;
pub mod compare_and_swap;
pub mod expiration;
pub mod in_memory;
pub mod proxy;
pub mod select_for_update;
pub mod settings;

pub use advisory_lock::{AdvisoryLockBackend, AdvisoryLockStorage, AdvisoryLockTransaction};
pub use backend::{Backend, BucketKey, CommandExecutor};
pub use compare_and_swap::{CompareAndSwapBackend, CompareAndSwapOperation, CompareAndSwapStorage};
pub use expiration::ExpirationAfterWriteStrategy;
pub use in_memory::{
    InMemoryCasOperation, InMemoryCasStorage, InMemoryLockStorage, InMemoryTransaction, TransactionStats,
};
pub use proxy::{BucketProxy, BucketProxyBuilder, ProxyManager, ProxyManagerBuilder, RecoveryStrategy};
pub use select_for_update::{
    LockAndGetResult, SelectForUpdateBackend, SelectForUpdateStorage, SelectForUpdateTransaction,
};
pub use settings::{ClientSideConfig, ClientSideSettings, ClockSettings, ExpirationSettings};
