//! Remote command protocol.
//!
//! A [`RemoteCommand`] is a pure transition over a [`MutableBucketEntry`] at a given time.
//! The same value runs in-process, inside a storage transaction, or in a storage-side
//! processor after travelling over the wire, and always produces the same [`CommandResult`].
//!
//! ```rust
//! use std::time::Duration;
//! use tokenwell::command::{BucketEntry, MutableBucketEntry, Payload, RemoteCommand};
//! use tokenwell::{Bandwidth, BucketConfiguration, RemoteBucketState};
//!
//! let config = BucketConfiguration::single(Bandwidth::simple(10, Duration::from_secs(1)).unwrap());
//! let mut entry = BucketEntry::new(Some(RemoteBucketState::new(config, 0)));
//!
//! let batch = RemoteCommand::Multi {
//!     commands: vec![
//!         RemoteCommand::TryConsume { tokens: 4 },
//!         RemoteCommand::GetAvailableTokens,
//!     ],
//! };
//! let results = batch.execute(&mut entry, 0).into_multi().unwrap();
//! assert_eq!(results[1].clone().into_long().unwrap(), 6);
//! assert!(entry.is_modified());
//! ```

mod entry;
mod result;

use serde::{Deserialize, Serialize};

use crate::config::{BucketConfiguration, TokensInheritanceStrategy};
use crate::remote_state::RemoteBucketState;

pub use entry::{BucketEntry, MutableBucketEntry};
pub use result::{
    CommandResult, ConsumeOutcome, ConsumptionProbe, EstimationProbe, Payload, RemoteError,
};

/// Every operation that can be applied to bucket state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum RemoteCommand {
    /// Consume if available. Payload: `Bool`.
    TryConsume { tokens: i64 },
    /// Consume if available. Payload: `Outcome`.
    Consume { tokens: i64 },
    /// Payload: `ConsumptionProbe`.
    TryConsumeAndReturnRemaining { tokens: i64 },
    /// Consume up to `limit`. Payload: `Long` (tokens taken).
    ConsumeAsMuchAsPossible { limit: i64 },
    /// Read-only. Payload: `EstimationProbe`.
    EstimateAbilityToConsume { tokens: i64 },
    /// Read-only. Payload: `Long`.
    GetAvailableTokens,
    /// Payload: `Long` (nanos to wait, or `i64::MAX` when nothing was reserved).
    ReserveAndCalculateTimeToSleep { tokens: i64, max_wait_nanos: i64 },
    AddTokens { tokens: i64 },
    ForceAddTokens { tokens: i64 },
    /// Payload: `Long` (tokens written off because the balance floors at zero).
    ConsumeIgnoringRateLimits { tokens: i64 },
    Reset,
    /// Payload: `Configuration` (the previous one).
    ReplaceConfiguration {
        configuration: BucketConfiguration,
        strategy: TokensInheritanceStrategy,
    },
    GetConfiguration,
    /// Payload: `Snapshot`.
    CreateSnapshot,
    /// No-op on state. Forces optimizers to synchronize past the given thresholds.
    Sync { unsynchronized_tokens: i64, nanos_since_last_sync: i64 },
    CreateInitialStateAndExecute {
        configuration: BucketConfiguration,
        command: Box<RemoteCommand>,
    },
    CheckConfigurationVersionAndExecute {
        desired_version: i64,
        command: Box<RemoteCommand>,
    },
    InitOrReplaceConfigurationAndExecute {
        configuration: BucketConfiguration,
        desired_version: i64,
        strategy: TokensInheritanceStrategy,
        command: Box<RemoteCommand>,
    },
    /// Payload: `Multi`, index-aligned with `commands`.
    Multi { commands: Vec<RemoteCommand> },
}

impl RemoteCommand {
    /// Run against `entry` at `now`.
    pub fn execute(&self, entry: &mut dyn MutableBucketEntry, now: i64) -> CommandResult {
        match self {
            RemoteCommand::TryConsume { tokens } => mutate(entry, |state| {
                let consumed = state.try_consume(*tokens, now);
                (Payload::Bool(consumed), consumed)
            }),
            RemoteCommand::Consume { tokens } => mutate(entry, |state| {
                let outcome = state.consume(*tokens, now);
                (Payload::Outcome(outcome), outcome.is_consumed())
            }),
            RemoteCommand::TryConsumeAndReturnRemaining { tokens } => mutate(entry, |state| {
                let probe = state.try_consume_and_return_remaining(*tokens, now);
                (Payload::ConsumptionProbe(probe), probe.consumed)
            }),
            RemoteCommand::ConsumeAsMuchAsPossible { limit } => mutate(entry, |state| {
                let consumed = state.consume_as_much_as_possible(*limit, now);
                (Payload::Long(consumed), consumed > 0)
            }),
            RemoteCommand::EstimateAbilityToConsume { tokens } => read(entry, |state| {
                Payload::EstimationProbe(state.estimate_ability_to_consume(*tokens, now))
            }),
            RemoteCommand::GetAvailableTokens => {
                read(entry, |state| Payload::Long(state.available_tokens(now)))
            }
            RemoteCommand::ReserveAndCalculateTimeToSleep { tokens, max_wait_nanos } => {
                mutate(entry, |state| {
                    let delay = state.reserve(*tokens, *max_wait_nanos, now);
                    (Payload::Long(delay), delay != i64::MAX)
                })
            }
            RemoteCommand::AddTokens { tokens } => mutate(entry, |state| {
                state.add_tokens(*tokens, now);
                (Payload::Nothing, true)
            }),
            RemoteCommand::ForceAddTokens { tokens } => mutate(entry, |state| {
                state.force_add_tokens(*tokens, now);
                (Payload::Nothing, true)
            }),
            RemoteCommand::ConsumeIgnoringRateLimits { tokens } => mutate(entry, |state| {
                (Payload::Long(state.consume_ignoring_rate_limits(*tokens, now)), true)
            }),
            RemoteCommand::Reset => mutate(entry, |state| {
                state.reset(now);
                (Payload::Nothing, true)
            }),
            RemoteCommand::ReplaceConfiguration { configuration, strategy } => {
                mutate(entry, |state| {
                    let previous = state.replace_configuration(configuration.clone(), *strategy, now);
                    (Payload::Configuration(previous), true)
                })
            }
            RemoteCommand::GetConfiguration => {
                read(entry, |state| Payload::Configuration(state.configuration().clone()))
            }
            RemoteCommand::CreateSnapshot => read(entry, |state| Payload::Snapshot(state.clone())),
            RemoteCommand::Sync { .. } => read(entry, |_| Payload::Nothing),
            RemoteCommand::CreateInitialStateAndExecute { configuration, command } => {
                if entry.exists() {
                    return command.execute(entry, now);
                }
                entry.set(RemoteBucketState::new(configuration.clone(), now));
                command.execute(entry, now).with_state_modified(true)
            }
            RemoteCommand::CheckConfigurationVersionAndExecute { desired_version, command } => {
                match entry.get() {
                    None => CommandResult::BucketNotFound,
                    Some(state) if is_outdated(state, *desired_version) => {
                        CommandResult::ConfigurationNeedToBeReplaced
                    }
                    Some(_) => command.execute(entry, now),
                }
            }
            RemoteCommand::InitOrReplaceConfigurationAndExecute {
                configuration,
                desired_version,
                strategy,
                command,
            } => {
                let next = match entry.get() {
                    None => RemoteBucketState::with_version(configuration.clone(), *desired_version, now),
                    Some(state) if !is_outdated(state, *desired_version) => {
                        // Someone else already installed this version.
                        return command.execute(entry, now);
                    }
                    Some(state) => {
                        let mut next = state.clone();
                        next.replace_configuration(configuration.clone(), *strategy, now);
                        next.set_configuration_version(Some(*desired_version));
                        next
                    }
                };
                entry.set(next);
                command.execute(entry, now).with_state_modified(true)
            }
            RemoteCommand::Multi { commands } => {
                let mut modified = false;
                let results = commands
                    .iter()
                    .map(|command| {
                        let result = command.execute(&mut *entry, now);
                        modified |= result.is_state_modified();
                        result
                    })
                    .collect();
                CommandResult::success(Payload::Multi(results), modified)
            }
        }
    }

    /// Whether an optimizer must go remote for this command regardless of its thresholds.
    pub fn is_immediate_sync_required(&self, unsynchronized_tokens: i64, nanos_since_last_sync: i64) -> bool {
        match self {
            RemoteCommand::AddTokens { .. }
            | RemoteCommand::ForceAddTokens { .. }
            | RemoteCommand::Reset
            | RemoteCommand::ReplaceConfiguration { .. }
            | RemoteCommand::CreateSnapshot
            | RemoteCommand::InitOrReplaceConfigurationAndExecute { .. } => true,
            RemoteCommand::Sync { unsynchronized_tokens: tokens_threshold, nanos_since_last_sync: nanos_threshold } => {
                unsynchronized_tokens >= *tokens_threshold || nanos_since_last_sync >= *nanos_threshold
            }
            RemoteCommand::CreateInitialStateAndExecute { command, .. }
            | RemoteCommand::CheckConfigurationVersionAndExecute { command, .. } => {
                command.is_immediate_sync_required(unsynchronized_tokens, nanos_since_last_sync)
            }
            RemoteCommand::Multi { commands } => commands
                .iter()
                .any(|c| c.is_immediate_sync_required(unsynchronized_tokens, nanos_since_last_sync)),
            _ => false,
        }
    }

    /// Upper bound of tokens this command may consume, for optimizer accounting.
    pub fn estimate_tokens_to_consume(&self) -> i64 {
        match self {
            RemoteCommand::TryConsume { tokens }
            | RemoteCommand::Consume { tokens }
            | RemoteCommand::TryConsumeAndReturnRemaining { tokens }
            | RemoteCommand::ReserveAndCalculateTimeToSleep { tokens, .. }
            | RemoteCommand::ConsumeIgnoringRateLimits { tokens } => *tokens,
            RemoteCommand::ConsumeAsMuchAsPossible { limit } => *limit,
            RemoteCommand::CreateInitialStateAndExecute { command, .. }
            | RemoteCommand::CheckConfigurationVersionAndExecute { command, .. }
            | RemoteCommand::InitOrReplaceConfigurationAndExecute { command, .. } => {
                command.estimate_tokens_to_consume()
            }
            RemoteCommand::Multi { commands } => commands
                .iter()
                .fold(0i64, |sum, c| sum.saturating_add(c.estimate_tokens_to_consume())),
            _ => 0,
        }
    }

    /// Tokens this command actually consumed, given its result.
    ///
    /// `None` when the total does not fit in `i64`; optimizers treat that as "go remote".
    pub fn consumed_tokens(&self, result: &CommandResult) -> Option<i64> {
        let payload = match result {
            CommandResult::Success { payload, .. } => payload,
            _ => return Some(0),
        };
        match (self, payload) {
            (RemoteCommand::TryConsume { tokens }, Payload::Bool(true)) => Some(*tokens),
            (RemoteCommand::Consume { tokens }, Payload::Outcome(outcome)) if outcome.is_consumed() => {
                Some(*tokens)
            }
            (RemoteCommand::TryConsumeAndReturnRemaining { tokens }, Payload::ConsumptionProbe(probe))
                if probe.consumed =>
            {
                Some(*tokens)
            }
            (RemoteCommand::ConsumeAsMuchAsPossible { .. }, Payload::Long(consumed)) => Some(*consumed),
            (RemoteCommand::ReserveAndCalculateTimeToSleep { tokens, .. }, Payload::Long(delay))
                if *delay != i64::MAX =>
            {
                Some(*tokens)
            }
            (RemoteCommand::ConsumeIgnoringRateLimits { tokens }, _) => Some(*tokens),
            (RemoteCommand::CreateInitialStateAndExecute { command, .. }, _)
            | (RemoteCommand::CheckConfigurationVersionAndExecute { command, .. }, _)
            | (RemoteCommand::InitOrReplaceConfigurationAndExecute { command, .. }, _) => {
                command.consumed_tokens(result)
            }
            (RemoteCommand::Multi { commands }, Payload::Multi(results)) => {
                commands.iter().zip(results).try_fold(0i64, |sum, (command, result)| {
                    sum.checked_add(command.consumed_tokens(result)?)
                })
            }
            _ => Some(0),
        }
    }
}

fn is_outdated(state: &RemoteBucketState, desired_version: i64) -> bool {
    state.configuration_version().map_or(true, |version| version < desired_version)
}

fn read(
    entry: &mut dyn MutableBucketEntry,
    f: impl FnOnce(&RemoteBucketState) -> Payload,
) -> CommandResult {
    match entry.get() {
        Some(state) => CommandResult::read_only(f(state)),
        None => CommandResult::BucketNotFound,
    }
}

fn mutate(
    entry: &mut dyn MutableBucketEntry,
    f: impl FnOnce(&mut RemoteBucketState) -> (Payload, bool),
) -> CommandResult {
    let Some(current) = entry.get() else {
        return CommandResult::BucketNotFound;
    };
    let mut state = current.clone();
    let (payload, commit) = f(&mut state);
    if commit {
        entry.set(state);
    }
    CommandResult::success(payload, commit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandwidth::Bandwidth;
    use std::time::Duration;

    fn config(capacity: i64) -> BucketConfiguration {
        BucketConfiguration::single(Bandwidth::simple(capacity, Duration::from_secs(1)).unwrap())
    }

    fn entry(capacity: i64) -> BucketEntry {
        BucketEntry::new(Some(RemoteBucketState::new(config(capacity), 0)))
    }

    #[test]
    fn multi_results_are_index_aligned() {
        let mut entry = entry(5);
        let commands = vec![
            RemoteCommand::TryConsume { tokens: 3 },
            RemoteCommand::TryConsume { tokens: 3 },
            RemoteCommand::GetAvailableTokens,
            RemoteCommand::Consume { tokens: 2 },
            RemoteCommand::Consume { tokens: 1 },
        ];
        let results = RemoteCommand::Multi { commands }.execute(&mut entry, 0).into_multi().unwrap();
        assert_eq!(results.len(), 5);
        assert!(results[0].clone().into_bool().unwrap());
        assert!(!results[1].clone().into_bool().unwrap());
        assert_eq!(results[2].clone().into_long().unwrap(), 2);
        assert_eq!(results[3].clone().into_outcome().unwrap(), ConsumeOutcome::Consumed { remaining: 0 });
        assert_eq!(results[4].clone().into_outcome().unwrap(), ConsumeOutcome::Insufficient { available: 0 });
    }

    #[test]
    fn failed_consume_does_not_write_entry() {
        let mut entry = entry(5);
        let result = RemoteCommand::TryConsume { tokens: 6 }.execute(&mut entry, 0);
        assert_eq!(result, CommandResult::read_only(Payload::Bool(false)));
        assert!(!entry.is_modified());
    }

    #[test]
    fn read_only_commands_never_modify() {
        let mut entry = entry(5);
        for command in [
            RemoteCommand::GetAvailableTokens,
            RemoteCommand::EstimateAbilityToConsume { tokens: 100 },
            RemoteCommand::GetConfiguration,
            RemoteCommand::CreateSnapshot,
            RemoteCommand::Sync { unsynchronized_tokens: 0, nanos_since_last_sync: 0 },
        ] {
            assert!(!command.execute(&mut entry, 10).is_state_modified());
        }
        assert!(!entry.is_modified());
    }

    #[test]
    fn missing_entry_reports_not_found_per_sub_command() {
        let mut entry = BucketEntry::empty();
        let commands = vec![
            RemoteCommand::TryConsume { tokens: 1 },
            RemoteCommand::CreateInitialStateAndExecute {
                configuration: config(3),
                command: Box::new(RemoteCommand::TryConsume { tokens: 1 }),
            },
            RemoteCommand::GetAvailableTokens,
        ];
        let result = RemoteCommand::Multi { commands }.execute(&mut entry, 0);
        assert!(result.is_state_modified());
        assert!(!result.needs_initialization());
        let results = result.into_multi().unwrap();
        assert!(results[0].is_bucket_not_found());
        assert!(results[1].clone().into_bool().unwrap());
        assert_eq!(results[2].clone().into_long().unwrap(), 2);
    }

    #[test]
    fn create_initial_state_only_when_missing() {
        let wrapped = RemoteCommand::CreateInitialStateAndExecute {
            configuration: config(10),
            command: Box::new(RemoteCommand::GetAvailableTokens),
        };
        let mut missing = BucketEntry::empty();
        let result = wrapped.execute(&mut missing, 0);
        assert!(result.is_state_modified());
        assert_eq!(result.into_long().unwrap(), 10);

        let mut existing = entry(4);
        let result = wrapped.execute(&mut existing, 0);
        assert!(!result.is_state_modified());
        assert_eq!(result.into_long().unwrap(), 4);
    }

    #[test]
    fn configuration_version_check_and_replacement() {
        let mut entry = entry(5);
        let check = RemoteCommand::CheckConfigurationVersionAndExecute {
            desired_version: 2,
            command: Box::new(RemoteCommand::TryConsume { tokens: 1 }),
        };
        assert!(check.execute(&mut entry, 0).is_configuration_need_to_be_replaced());

        let replace = RemoteCommand::InitOrReplaceConfigurationAndExecute {
            configuration: config(50),
            desired_version: 2,
            strategy: TokensInheritanceStrategy::AsIs,
            command: Box::new(RemoteCommand::TryConsume { tokens: 1 }),
        };
        assert!(replace.execute(&mut entry, 0).into_bool().unwrap());
        let stored = entry.get().unwrap();
        assert_eq!(stored.configuration_version(), Some(2));
        assert_eq!(stored.configuration(), &config(50));
        assert_eq!(stored.available_tokens(0), 4);

        // The same version is not applied twice.
        assert!(check.execute(&mut entry, 0).into_bool().unwrap());
        let again = replace.execute(&mut entry, 0);
        assert!(again.into_bool().unwrap());
        assert_eq!(entry.get().unwrap().available_tokens(0), 2);
    }

    #[test]
    fn sync_thresholds() {
        let sync = RemoteCommand::Sync { unsynchronized_tokens: 10, nanos_since_last_sync: 1_000 };
        assert!(!sync.is_immediate_sync_required(9, 999));
        assert!(sync.is_immediate_sync_required(10, 0));
        assert!(sync.is_immediate_sync_required(0, 1_000));
        assert!(RemoteCommand::AddTokens { tokens: 1 }.is_immediate_sync_required(0, 0));
        assert!(!RemoteCommand::TryConsume { tokens: 1 }.is_immediate_sync_required(0, 0));
        let multi = RemoteCommand::Multi {
            commands: vec![RemoteCommand::TryConsume { tokens: 1 }, RemoteCommand::Reset],
        };
        assert!(multi.is_immediate_sync_required(0, 0));
    }

    #[test]
    fn consumed_tokens_follow_results() {
        let mut entry = entry(5);
        let multi = RemoteCommand::Multi {
            commands: vec![
                RemoteCommand::TryConsume { tokens: 2 },
                RemoteCommand::TryConsume { tokens: 9 },
                RemoteCommand::ConsumeAsMuchAsPossible { limit: 100 },
                RemoteCommand::ConsumeIgnoringRateLimits { tokens: 4 },
            ],
        };
        assert_eq!(multi.estimate_tokens_to_consume(), 115);
        let result = multi.execute(&mut entry, 0);
        assert_eq!(multi.consumed_tokens(&result), Some(2 + 3 + 4));
        assert_eq!(entry.get().unwrap().consumed_tokens(), 9);

        let overflow = RemoteCommand::Multi {
            commands: vec![
                RemoteCommand::ConsumeIgnoringRateLimits { tokens: i64::MAX },
                RemoteCommand::ConsumeIgnoringRateLimits { tokens: 1 },
            ],
        };
        let result = overflow.execute(&mut entry, 0);
        assert_eq!(overflow.consumed_tokens(&result), None);
    }
}
