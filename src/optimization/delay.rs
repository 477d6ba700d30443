//! Sync policy that answers locally until a token or time threshold is crossed.

use super::synced::{Progress, SyncPolicy};
use super::DelayParameters;
use crate::command::RemoteCommand;

/// Local answers while both the token and the time threshold hold.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DelayPolicy {
    max_tokens: i64,
    max_nanos: i64,
}

impl DelayPolicy {
    pub(crate) fn new(parameters: DelayParameters) -> Self {
        Self {
            max_tokens: parameters.max_unsynchronized_tokens(),
            max_nanos: parameters.max_unsynchronized_nanos(),
        }
    }

    pub(crate) fn within_thresholds(&self, progress: &Progress, command: &RemoteCommand, now: i64) -> bool {
        let since_sync = progress.nanos_since_sync(now);
        if since_sync >= self.max_nanos || command.is_immediate_sync_required(progress.postponed, since_sync) {
            return false;
        }
        progress
            .postponed
            .checked_add(command.estimate_tokens_to_consume())
            .is_some_and(|total| total <= self.max_tokens)
    }
}

impl SyncPolicy for DelayPolicy {
    fn may_run_locally(&mut self, progress: &Progress, command: &RemoteCommand, now: i64) -> bool {
        self.within_thresholds(progress, command, now)
    }
}
