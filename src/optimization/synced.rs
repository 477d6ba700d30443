//! Executor that serves commands from a local copy of the bucket and synchronizes it with
//! storage when its [`SyncPolicy`] says so.
//!
//! Tokens consumed locally are "postponed": they are pushed to storage with the next remote
//! request as `ConsumeIgnoringRateLimits`, followed by the caller's command and a
//! `CreateSnapshot` that re-anchors the local copy.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::command::{BucketEntry, CommandResult, Payload, RemoteCommand};
use crate::distributed::CommandExecutor;
use crate::error::ExecutionError;
use crate::listener::{BucketEvent, SharedSink};
use crate::remote_state::RemoteBucketState;

/// Bookkeeping shared with the policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Progress {
    /// Tokens consumed locally and not yet written to storage.
    pub(crate) postponed: i64,
    pub(crate) last_sync_nanos: i64,
    /// Everything this handle consumed, local or remote.
    pub(crate) self_consumed: i64,
}

impl Progress {
    pub(crate) fn nanos_since_sync(&self, now: i64) -> i64 {
        now.saturating_sub(self.last_sync_nanos)
    }
}

/// Decides when the local copy may answer.
pub(crate) trait SyncPolicy: Send + 'static {
    fn may_run_locally(&mut self, progress: &Progress, command: &RemoteCommand, now: i64) -> bool;

    /// Adjust the local copy right before a command runs against it.
    fn before_local_execution(&mut self, _snapshot: &mut RemoteBucketState, _now: i64) {}

    /// `self_in_snapshot` is how much of the snapshot's consumption counter this handle caused.
    fn on_synced(&mut self, _snapshot: &RemoteBucketState, _self_in_snapshot: i64, _now: i64) {}
}

struct LocalCopy<P> {
    snapshot: Option<RemoteBucketState>,
    progress: Progress,
    policy: P,
}

pub(crate) struct SyncingExecutor<P> {
    target: Arc<dyn CommandExecutor>,
    clock: Arc<dyn Clock>,
    listener: SharedSink,
    local: Mutex<LocalCopy<P>>,
    /// Serializes remote legs.
    remote: tokio::sync::Mutex<()>,
}

impl<P: SyncPolicy> SyncingExecutor<P> {
    pub(crate) fn new(target: Arc<dyn CommandExecutor>, clock: Arc<dyn Clock>, listener: SharedSink, policy: P) -> Self {
        Self {
            target,
            clock,
            listener,
            local: Mutex::new(LocalCopy { snapshot: None, progress: Progress::default(), policy }),
            remote: tokio::sync::Mutex::new(()),
        }
    }

    fn lock_local(&self) -> MutexGuard<'_, LocalCopy<P>> {
        self.local.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Answer from the local copy, or `None` when a remote request is needed.
    fn try_local(&self, command: &RemoteCommand) -> Option<CommandResult> {
        let now = self.clock.now_nanos();
        let (result, consumed) = {
            let mut guard = self.lock_local();
            let local = &mut *guard;
            let snapshot = local.snapshot.as_mut()?;
            if !local.policy.may_run_locally(&local.progress, command, now) {
                return None;
            }
            local.policy.before_local_execution(snapshot, now);

            let mut entry = BucketEntry::new(Some(snapshot.clone()));
            let result = command.execute(&mut entry, now);
            let consumed = command.consumed_tokens(&result)?;
            let postponed = local.progress.postponed.checked_add(consumed)?;
            if entry.is_modified() {
                if let Some(next) = entry.into_state() {
                    *snapshot = next;
                }
            }
            local.progress.postponed = postponed;
            local.progress.self_consumed = local.progress.self_consumed.saturating_add(consumed);
            (result, consumed)
        };
        self.listener.on_event(BucketEvent::Skipped { tokens: consumed });
        Some(result)
    }

    async fn sync_remotely(&self, command: RemoteCommand) -> Result<CommandResult, ExecutionError> {
        let sent = self.lock_local().progress.postponed;
        let mut commands = Vec::with_capacity(3);
        if sent > 0 {
            commands.push(RemoteCommand::ConsumeIgnoringRateLimits { tokens: sent });
        }
        commands.push(command.clone());
        commands.push(RemoteCommand::CreateSnapshot);

        let mut results = match self.target.execute(RemoteCommand::Multi { commands }).await {
            Ok(CommandResult::Success { payload: Payload::Multi(results), .. }) => results,
            Ok(other) => return Ok(other),
            Err(err) => {
                warn!(error = %err, postponed = sent, "remote sync failed, keeping local state");
                return Err(err);
            }
        };
        let snapshot = results.pop().and_then(|result| result.into_snapshot().ok());
        let result = results.pop().unwrap_or(CommandResult::BucketNotFound);
        let consumed = command.consumed_tokens(&result).unwrap_or(i64::MAX);

        let now = self.clock.now_nanos();
        {
            let mut guard = self.lock_local();
            let local = &mut *guard;
            // Written to storage, or dropped together with a bucket that no longer exists.
            local.progress.postponed = local.progress.postponed.saturating_sub(sent).max(0);
            local.progress.self_consumed = local.progress.self_consumed.saturating_add(consumed);
            match snapshot {
                Some(mut snapshot) => {
                    let pending = local.progress.postponed;
                    let self_in_snapshot = local.progress.self_consumed.saturating_sub(pending);
                    local.policy.on_synced(&snapshot, self_in_snapshot, now);
                    if pending > 0 {
                        // Consumed locally while this request was in flight.
                        snapshot.consume_ignoring_rate_limits(pending, now);
                    }
                    local.snapshot = Some(snapshot);
                    local.progress.last_sync_nanos = now;
                }
                None => local.snapshot = None,
            }
        }
        debug!(postponed = sent, "local copy synchronized");
        self.listener.on_event(BucketEvent::SyncedRemotely { postponed_tokens: sent });
        Ok(result)
    }
}

#[async_trait]
impl<P: SyncPolicy> CommandExecutor for SyncingExecutor<P> {
    async fn execute(&self, command: RemoteCommand) -> Result<CommandResult, ExecutionError> {
        if let Some(result) = self.try_local(&command) {
            return Ok(result);
        }
        let _leg = self.remote.lock().await;
        // A leg that finished while this caller waited may have made a local answer possible.
        if let Some(result) = self.try_local(&command) {
            return Ok(result);
        }
        self.sync_remotely(command).await
    }
}
