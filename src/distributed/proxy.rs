//! Proxies to buckets kept in a [`Backend`].
//!
//! A [`ProxyManager`] owns the backend and the client options. Each [`BucketProxy`] is bound
//! to one key and recreates its bucket from the configured [`BucketConfiguration`] when
//! storage reports it missing.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokenwell::distributed::{InMemoryCasStorage, ProxyManager};
//! use tokenwell::{Bandwidth, BucketConfiguration, SystemClock};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = ProxyManager::<String>::builder()
//!     .compare_and_swap(InMemoryCasStorage::new(Arc::new(SystemClock)));
//! let config = BucketConfiguration::single(Bandwidth::simple(10, Duration::from_secs(1)).unwrap());
//! let bucket = manager.proxy("user-42".to_string()).configuration(config).build().unwrap();
//! assert!(bucket.try_consume(1).await.unwrap());
//! # }
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::advisory_lock::{AdvisoryLockBackend, AdvisoryLockStorage};
use super::backend::{Backend, BackendExecutor, BucketKey, CommandExecutor};
use super::compare_and_swap::{CompareAndSwapBackend, CompareAndSwapStorage};
use super::expiration::ExpirationAfterWriteStrategy;
use super::select_for_update::{SelectForUpdateBackend, SelectForUpdateStorage};
use super::settings::ClientSideConfig;
use crate::clock::{duration_to_nanos, nanos_to_duration, Clock};
use crate::command::{CommandResult, ConsumeOutcome, ConsumptionProbe, EstimationProbe, RemoteCommand};
use crate::config::{BucketConfiguration, TokensInheritanceStrategy};
use crate::error::{BucketError, ConfigurationError, ExecutionError};
use crate::listener::{null_sink, BucketEvent, SharedSink};
use crate::local::check_tokens;
use crate::optimization::{Optimization, OptimizationController};
use crate::remote_state::RemoteBucketState;
use crate::serialization::Version;
use crate::sleeper::Sleeper;

/// What a proxy does when storage no longer holds its bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryStrategy {
    /// Recreate the bucket from the proxy's configuration.
    #[default]
    Reconstruct,
    /// Fail with [`ExecutionError::BucketNotFound`].
    ThrowBucketNotFound,
}

/// Builder for [`ProxyManager`].
pub struct ProxyManagerBuilder<K> {
    config: ClientSideConfig,
    _key: PhantomData<fn() -> K>,
}

impl<K: BucketKey> ProxyManagerBuilder<K> {
    /// Replace all client options at once.
    pub fn config(mut self, config: ClientSideConfig) -> Self {
        self.config = config;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Result<Self, ConfigurationError> {
        self.config = self.config.with_request_timeout(timeout)?;
        Ok(self)
    }

    pub fn expiration(mut self, expiration: ExpirationAfterWriteStrategy) -> Self {
        self.config = self.config.with_expiration(expiration);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.config = self.config.with_clock(clock);
        self
    }

    pub fn backward_compatibility_version(mut self, version: Version) -> Self {
        self.config = self.config.with_backward_compatibility_version(version);
        self
    }

    pub fn compare_and_swap<S>(self, storage: S) -> ProxyManager<K>
    where
        S: CompareAndSwapStorage<K> + 'static,
    {
        let backend = CompareAndSwapBackend::new(storage, self.config.clone());
        ProxyManager { backend: Arc::new(backend), config: self.config }
    }

    pub fn select_for_update<S>(self, storage: S) -> ProxyManager<K>
    where
        S: SelectForUpdateStorage<K> + 'static,
    {
        let backend = SelectForUpdateBackend::new(storage, self.config.clone());
        ProxyManager { backend: Arc::new(backend), config: self.config }
    }

    pub fn advisory_lock<S>(self, storage: S) -> ProxyManager<K>
    where
        S: AdvisoryLockStorage<K> + 'static,
    {
        let backend = AdvisoryLockBackend::new(storage, self.config.clone());
        ProxyManager { backend: Arc::new(backend), config: self.config }
    }

    /// Use a custom backend. It is expected to honour the same client options.
    pub fn backend(self, backend: Arc<dyn Backend<K>>) -> ProxyManager<K> {
        ProxyManager { backend, config: self.config }
    }
}

/// Entry point to distributed buckets of one backend.
pub struct ProxyManager<K: BucketKey> {
    backend: Arc<dyn Backend<K>>,
    config: ClientSideConfig,
}

impl<K: BucketKey> Clone for ProxyManager<K> {
    fn clone(&self) -> Self {
        Self { backend: self.backend.clone(), config: self.config.clone() }
    }
}

impl<K: BucketKey> fmt::Debug for ProxyManager<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyManager").field("config", &self.config).finish_non_exhaustive()
    }
}

impl<K: BucketKey> ProxyManager<K> {
    pub fn builder() -> ProxyManagerBuilder<K> {
        ProxyManagerBuilder { config: ClientSideConfig::default(), _key: PhantomData }
    }

    pub fn client_config(&self) -> &ClientSideConfig {
        &self.config
    }

    /// Start building a proxy to the bucket stored under `key`.
    pub fn proxy(&self, key: K) -> BucketProxyBuilder<K> {
        BucketProxyBuilder {
            key,
            backend: self.backend.clone(),
            clock: self.config.clock().clone(),
            compatibility: self.config.backward_compatibility_version(),
            configuration: None,
            replacement: None,
            optimization: Optimization::None,
            recovery: RecoveryStrategy::Reconstruct,
            listener: null_sink(),
        }
    }

    /// Stored configuration of `key`, or `None` when no bucket exists.
    pub async fn get_proxy_configuration(&self, key: &K) -> Result<Option<BucketConfiguration>, ExecutionError> {
        match self.backend.execute(key, RemoteCommand::GetConfiguration).await? {
            CommandResult::BucketNotFound => Ok(None),
            result => result.into_configuration().map(Some),
        }
    }

    pub async fn remove_proxy(&self, key: &K) -> Result<(), ExecutionError> {
        self.backend.remove(key).await
    }

    pub fn is_expire_after_write_supported(&self) -> bool {
        self.backend.is_expire_after_write_supported()
    }

    /// Remove up to `batch_size` expired buckets; returns how many were removed.
    pub async fn remove_expired(&self, batch_size: usize) -> Result<usize, ExecutionError> {
        self.backend.remove_expired(batch_size).await
    }
}

type ConfigurationSupplier = Arc<dyn Fn() -> BucketConfiguration + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ImplicitReplacement {
    desired_version: i64,
    strategy: TokensInheritanceStrategy,
}

/// Builder for [`BucketProxy`].
pub struct BucketProxyBuilder<K: BucketKey> {
    key: K,
    backend: Arc<dyn Backend<K>>,
    clock: Arc<dyn Clock>,
    compatibility: Version,
    configuration: Option<ConfigurationSupplier>,
    replacement: Option<ImplicitReplacement>,
    optimization: Optimization,
    recovery: RecoveryStrategy,
    listener: SharedSink,
}

impl<K: BucketKey> BucketProxyBuilder<K> {
    /// Configuration used when the bucket has to be created.
    pub fn configuration(self, configuration: BucketConfiguration) -> Self {
        self.configuration_supplier(move || configuration.clone())
    }

    /// Like [`configuration`](Self::configuration), computed each time a bucket is created.
    pub fn configuration_supplier<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> BucketConfiguration + Send + Sync + 'static,
    {
        self.configuration = Some(Arc::new(supplier));
        self
    }

    /// Replace the stored configuration once when it is older than `desired_version`.
    pub fn implicit_configuration_replacement(
        mut self,
        desired_version: i64,
        strategy: TokensInheritanceStrategy,
    ) -> Self {
        self.replacement = Some(ImplicitReplacement { desired_version, strategy });
        self
    }

    pub fn optimization(mut self, optimization: Optimization) -> Self {
        self.optimization = optimization;
        self
    }

    pub fn recovery_strategy(mut self, recovery: RecoveryStrategy) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn listener(mut self, listener: SharedSink) -> Self {
        self.listener = listener;
        self
    }

    pub fn build(self) -> Result<BucketProxy, ConfigurationError> {
        let configuration = self.configuration.ok_or_else(|| ConfigurationError::InvalidSettings {
            reason: "a bucket configuration is required".to_string(),
        })?;
        if self.replacement.is_some() && self.compatibility < Version::V2 {
            return Err(ConfigurationError::InvalidSettings {
                reason: format!("implicit configuration replacement requires format {}", Version::V2),
            });
        }
        let target: Arc<dyn CommandExecutor> = Arc::new(BackendExecutor::new(self.key, self.backend));
        let executor = self.optimization.apply(target, self.clock.clone(), self.listener.clone());
        let core = ProxyCore { executor, configuration, replacement: self.replacement, recovery: self.recovery };
        Ok(BucketProxy { core: Arc::new(core), listener: self.listener })
    }
}

/// Wraps commands for recovery and implicit replacement, and retries them when storage asks.
struct ProxyCore {
    executor: Arc<dyn CommandExecutor>,
    configuration: ConfigurationSupplier,
    replacement: Option<ImplicitReplacement>,
    recovery: RecoveryStrategy,
}

impl ProxyCore {
    /// `command` wrapped so that it creates or upgrades the bucket.
    fn initializing(&self, command: RemoteCommand) -> RemoteCommand {
        let configuration = (self.configuration)();
        match self.replacement {
            Some(ImplicitReplacement { desired_version, strategy }) => {
                RemoteCommand::InitOrReplaceConfigurationAndExecute {
                    configuration,
                    desired_version,
                    strategy,
                    command: Box::new(command),
                }
            }
            None => RemoteCommand::CreateInitialStateAndExecute { configuration, command: Box::new(command) },
        }
    }
}

#[async_trait]
impl CommandExecutor for ProxyCore {
    async fn execute(&self, command: RemoteCommand) -> Result<CommandResult, ExecutionError> {
        let first = match self.replacement {
            Some(ImplicitReplacement { desired_version, .. }) => RemoteCommand::CheckConfigurationVersionAndExecute {
                desired_version,
                command: Box::new(command.clone()),
            },
            None => command.clone(),
        };
        let result = self.executor.execute(first).await?;

        if result.needs_configuration_replacement() {
            debug!("stored configuration is outdated, replacing it");
            return self.executor.execute(self.initializing(command)).await;
        }
        if !result.needs_initialization() {
            return Ok(result);
        }
        match self.recovery {
            RecoveryStrategy::ThrowBucketNotFound => Err(ExecutionError::BucketNotFound),
            RecoveryStrategy::Reconstruct => {
                debug!("bucket not found, recreating it");
                self.executor.execute(self.initializing(command)).await
            }
        }
    }
}

/// Asynchronous handle to a bucket held by a backend.
///
/// Cheap to clone; clones share the optimization state.
#[derive(Clone)]
pub struct BucketProxy {
    core: Arc<ProxyCore>,
    listener: SharedSink,
}

impl fmt::Debug for BucketProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketProxy")
            .field("replacement", &self.core.replacement)
            .field("recovery", &self.core.recovery)
            .finish_non_exhaustive()
    }
}

impl BucketProxy {
    fn report(&self, consumed: bool, tokens: i64) {
        let event = if consumed { BucketEvent::Consumed { tokens } } else { BucketEvent::Rejected { tokens } };
        self.listener.on_event(event);
    }

    /// Run any command, with the proxy's recovery and replacement handling.
    pub async fn execute(&self, command: RemoteCommand) -> Result<CommandResult, ExecutionError> {
        self.core.execute(command).await
    }

    pub fn optimization_controller(&self) -> OptimizationController {
        OptimizationController::new(self.core.clone())
    }

    pub async fn try_consume(&self, tokens: i64) -> Result<bool, ExecutionError> {
        check_tokens(tokens)?;
        let consumed = self.execute(RemoteCommand::TryConsume { tokens }).await?.into_bool()?;
        self.report(consumed, tokens);
        Ok(consumed)
    }

    pub async fn consume(&self, tokens: i64) -> Result<ConsumeOutcome, ExecutionError> {
        check_tokens(tokens)?;
        let outcome = self.execute(RemoteCommand::Consume { tokens }).await?.into_outcome()?;
        self.report(outcome.is_consumed(), tokens);
        Ok(outcome)
    }

    pub async fn try_consume_and_return_remaining(&self, tokens: i64) -> Result<ConsumptionProbe, ExecutionError> {
        check_tokens(tokens)?;
        let command = RemoteCommand::TryConsumeAndReturnRemaining { tokens };
        let probe = self.execute(command).await?.into_consumption_probe()?;
        self.report(probe.consumed, tokens);
        Ok(probe)
    }

    pub async fn consume_as_much_as_possible(&self, limit: i64) -> Result<i64, ExecutionError> {
        check_tokens(limit)?;
        let taken = self.execute(RemoteCommand::ConsumeAsMuchAsPossible { limit }).await?.into_long()?;
        if taken > 0 {
            self.listener.on_event(BucketEvent::Consumed { tokens: taken });
        }
        Ok(taken)
    }

    pub async fn estimate_ability_to_consume(&self, tokens: i64) -> Result<EstimationProbe, ExecutionError> {
        check_tokens(tokens)?;
        self.execute(RemoteCommand::EstimateAbilityToConsume { tokens }).await?.into_estimation_probe()
    }

    pub async fn available_tokens(&self) -> Result<i64, ExecutionError> {
        self.execute(RemoteCommand::GetAvailableTokens).await?.into_long()
    }

    pub async fn add_tokens(&self, tokens: i64) -> Result<(), ExecutionError> {
        check_tokens(tokens)?;
        self.execute(RemoteCommand::AddTokens { tokens }).await?.into_unit()
    }

    pub async fn force_add_tokens(&self, tokens: i64) -> Result<(), ExecutionError> {
        check_tokens(tokens)?;
        self.execute(RemoteCommand::ForceAddTokens { tokens }).await?.into_unit()
    }

    /// Returns the tokens written off because the balance floors at zero.
    pub async fn consume_ignoring_rate_limits(&self, tokens: i64) -> Result<i64, ExecutionError> {
        check_tokens(tokens)?;
        let overdraft = self.execute(RemoteCommand::ConsumeIgnoringRateLimits { tokens }).await?.into_long()?;
        self.listener.on_event(BucketEvent::Consumed { tokens });
        Ok(overdraft)
    }

    pub async fn reset(&self) -> Result<(), ExecutionError> {
        self.execute(RemoteCommand::Reset).await?.into_unit()
    }

    /// Returns the previous configuration.
    pub async fn replace_configuration(
        &self,
        configuration: BucketConfiguration,
        strategy: TokensInheritanceStrategy,
    ) -> Result<BucketConfiguration, ExecutionError> {
        self.execute(RemoteCommand::ReplaceConfiguration { configuration, strategy }).await?.into_configuration()
    }

    pub async fn configuration(&self) -> Result<BucketConfiguration, ExecutionError> {
        self.execute(RemoteCommand::GetConfiguration).await?.into_configuration()
    }

    pub async fn snapshot(&self) -> Result<RemoteBucketState, ExecutionError> {
        self.execute(RemoteCommand::CreateSnapshot).await?.into_snapshot()
    }

    /// Reserve `tokens` if they become available within `max_wait`; returns the wait.
    pub async fn try_reserve(&self, tokens: i64, max_wait: Duration) -> Result<Option<Duration>, ExecutionError> {
        check_tokens(tokens)?;
        Ok(self.reserve(tokens, duration_to_nanos(max_wait)).await?.map(nanos_to_duration))
    }

    async fn reserve(&self, tokens: i64, max_wait_nanos: i64) -> Result<Option<i64>, ExecutionError> {
        let command = RemoteCommand::ReserveAndCalculateTimeToSleep { tokens, max_wait_nanos };
        let delay = self.execute(command).await?.into_long()?;
        let reserved = delay != i64::MAX;
        self.report(reserved, tokens);
        Ok(reserved.then_some(delay))
    }

    async fn sleep(&self, nanos: i64, sleeper: &dyn Sleeper) {
        if nanos > 0 {
            self.listener.on_event(BucketEvent::Delayed { nanos });
            sleeper.sleep(nanos_to_duration(nanos)).await;
        }
    }

    /// Reserve `tokens` and sleep until they are available.
    pub async fn consume_async(&self, tokens: i64, sleeper: &dyn Sleeper) -> Result<(), ExecutionError> {
        check_tokens(tokens)?;
        let delay = self
            .reserve(tokens, i64::MAX)
            .await?
            .ok_or(ExecutionError::Bucket(BucketError::ReservationOverflow { tokens }))?;
        self.sleep(delay, sleeper).await;
        Ok(())
    }

    /// Like [`consume_async`](Self::consume_async), giving up when the wait would exceed
    /// `max_wait`.
    pub async fn try_consume_async(
        &self,
        tokens: i64,
        max_wait: Duration,
        sleeper: &dyn Sleeper,
    ) -> Result<bool, ExecutionError> {
        check_tokens(tokens)?;
        match self.reserve(tokens, duration_to_nanos(max_wait)).await? {
            None => Ok(false),
            Some(delay) => {
                self.sleep(delay, sleeper).await;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandwidth::Bandwidth;
    use crate::clock::ManualClock;
    use crate::distributed::in_memory::InMemoryCasStorage;
    use crate::listener::MemorySink;
    use crate::sleeper::TrackingSleeper;

    fn config(capacity: i64) -> BucketConfiguration {
        BucketConfiguration::single(Bandwidth::simple(capacity, Duration::from_secs(10)).unwrap())
    }

    fn manager(clock: &ManualClock) -> ProxyManager<String> {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        ProxyManager::builder().clock(clock.clone()).compare_and_swap(InMemoryCasStorage::new(clock))
    }

    #[tokio::test]
    async fn bucket_is_created_on_first_use() {
        let manager = manager(&ManualClock::new(0));
        let key = "a".to_string();
        assert_eq!(manager.get_proxy_configuration(&key).await.unwrap(), None);

        let bucket = manager.proxy(key.clone()).configuration(config(5)).build().unwrap();
        assert!(bucket.try_consume(2).await.unwrap());
        assert_eq!(bucket.available_tokens().await.unwrap(), 3);
        assert_eq!(manager.get_proxy_configuration(&key).await.unwrap(), Some(config(5)));
    }

    #[tokio::test]
    async fn removed_bucket_is_recreated_or_reported() {
        let manager = manager(&ManualClock::new(0));
        let key = "a".to_string();
        let bucket = manager.proxy(key.clone()).configuration(config(5)).build().unwrap();
        let strict = manager
            .proxy(key.clone())
            .configuration(config(5))
            .recovery_strategy(RecoveryStrategy::ThrowBucketNotFound)
            .build()
            .unwrap();

        assert!(matches!(strict.try_consume(1).await, Err(ExecutionError::BucketNotFound)));
        bucket.try_consume(5).await.unwrap();
        assert!(!strict.try_consume(1).await.unwrap());

        manager.remove_proxy(&key).await.unwrap();
        assert!(matches!(strict.available_tokens().await, Err(ExecutionError::BucketNotFound)));
        assert_eq!(bucket.available_tokens().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn implicit_replacement_happens_once_per_version() {
        let manager = manager(&ManualClock::new(0));
        let key = "a".to_string();
        let old = manager
            .proxy(key.clone())
            .configuration(config(10))
            .implicit_configuration_replacement(1, TokensInheritanceStrategy::AsIs)
            .build()
            .unwrap();
        let new = manager
            .proxy(key.clone())
            .configuration(config(100))
            .implicit_configuration_replacement(2, TokensInheritanceStrategy::AsIs)
            .build()
            .unwrap();

        assert!(old.try_consume(4).await.unwrap());
        assert!(new.try_consume(1).await.unwrap());
        assert_eq!(manager.get_proxy_configuration(&key).await.unwrap(), Some(config(100)));
        assert_eq!(new.available_tokens().await.unwrap(), 5);

        // The older proxy does not downgrade the stored configuration.
        assert!(old.try_consume(1).await.unwrap());
        assert_eq!(new.configuration().await.unwrap(), config(100));
        assert_eq!(new.snapshot().await.unwrap().configuration_version(), Some(2));
    }

    #[tokio::test]
    async fn replacement_needs_a_versioned_format() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let manager = ProxyManager::<u32>::builder()
            .backward_compatibility_version(Version::V1)
            .compare_and_swap(InMemoryCasStorage::new(clock));
        let err = manager
            .proxy(1)
            .configuration(config(1))
            .implicit_configuration_replacement(1, TokensInheritanceStrategy::Reset)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidSettings { .. }));
        assert!(manager.proxy(2).build().is_err());
    }

    #[tokio::test]
    async fn async_waiting_and_events() {
        let clock = ManualClock::new(0);
        let manager = manager(&clock);
        let sink = Arc::new(MemorySink::new());
        let bucket = manager
            .proxy("a".to_string())
            .configuration(config(10))
            .listener(sink.clone())
            .build()
            .unwrap();
        let sleeper = TrackingSleeper::new();

        bucket.consume_async(10, &sleeper).await.unwrap();
        assert!(sleeper.calls().is_empty());
        bucket.consume_async(2, &sleeper).await.unwrap();
        assert_eq!(sleeper.calls(), vec![Duration::from_secs(2)]);
        assert!(!bucket.try_consume_async(1, Duration::from_secs(1), &sleeper).await.unwrap());
        assert!(matches!(
            bucket.consume_async(11, &sleeper).await,
            Err(ExecutionError::Bucket(BucketError::ReservationOverflow { tokens: 11 }))
        ));
        assert!(matches!(
            bucket.try_consume(0).await,
            Err(ExecutionError::Bucket(BucketError::InvalidTokens(0)))
        ));

        let events = sink.events();
        assert_eq!(events[0], BucketEvent::Consumed { tokens: 10 });
        assert!(events.contains(&BucketEvent::Delayed { nanos: 2_000_000_000 }));
        assert!(events.contains(&BucketEvent::Rejected { tokens: 1 }));
    }

    #[tokio::test]
    async fn manual_optimization_syncs_on_request() {
        let clock = ManualClock::new(0);
        let storage = InMemoryCasStorage::new(Arc::new(clock.clone()));
        let manager = ProxyManager::<String>::builder()
            .clock(Arc::new(clock.clone()))
            .compare_and_swap(storage.clone());
        let key = "a".to_string();
        let bucket = manager
            .proxy(key.clone())
            .configuration(config(10))
            .optimization(Optimization::Manual)
            .build()
            .unwrap();

        assert!(bucket.try_consume(1).await.unwrap());
        assert!(bucket.try_consume(3).await.unwrap());
        assert_eq!(storage.state(&key).unwrap().consumed_tokens(), 1);

        bucket.optimization_controller().sync_immediately().await.unwrap();
        assert_eq!(storage.state(&key).unwrap().consumed_tokens(), 4);
    }
}
