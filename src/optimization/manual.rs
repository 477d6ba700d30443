//! Sync policy driven only by explicit requests through the optimization controller.

use super::synced::{Progress, SyncPolicy};
use crate::command::RemoteCommand;

/// Local answers until a sync is requested, a command must reach storage, or the postponed
/// counter would overflow.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ManualPolicy;

impl SyncPolicy for ManualPolicy {
    fn may_run_locally(&mut self, progress: &Progress, command: &RemoteCommand, now: i64) -> bool {
        !command.is_immediate_sync_required(progress.postponed, progress.nanos_since_sync(now))
            && progress.postponed.checked_add(command.estimate_tokens_to_consume()).is_some()
    }
}
