//! Results of remote commands and the typed values they carry.

use serde::{Deserialize, Serialize};

use crate::config::BucketConfiguration;
use crate::error::ExecutionError;
use crate::remote_state::RemoteBucketState;

/// Outcome of [`RemoteCommand::Consume`](super::RemoteCommand::Consume).
///
/// Insufficient tokens is a normal outcome, so a batch can keep going after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConsumeOutcome {
    /// Tokens were taken; `remaining` is what is left.
    Consumed { remaining: i64 },
    /// Nothing was taken; `available` is what the bucket holds.
    Insufficient { available: i64 },
}

impl ConsumeOutcome {
    pub fn is_consumed(&self) -> bool {
        matches!(self, ConsumeOutcome::Consumed { .. })
    }
}

/// Result of a consume attempt that also reports the bucket's situation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionProbe {
    pub consumed: bool,
    /// Tokens left after the attempt, never negative.
    pub remaining_tokens: i64,
    /// Zero when consumed, otherwise the wait until the request could succeed.
    pub nanos_to_wait_for_refill: i64,
    /// Wait until every bandwidth is back at capacity.
    pub nanos_to_wait_for_reset: i64,
}

/// Read-only answer to "could I consume this many tokens now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimationProbe {
    pub can_be_consumed: bool,
    pub remaining_tokens: i64,
    pub nanos_to_wait_for_refill: i64,
}

/// Failure reported by the side that executed a command.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteError {
    /// The executing side has no decoder for the command type.
    #[error("command type {type_id} is not supported by the executing side")]
    UnsupportedType {
        /// Type tag of the rejected command.
        type_id: u16,
    },
    /// The request was written with a newer format than the executing side reads.
    #[error("request format version {requested} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version of the request.
        requested: i32,
        /// Highest version the executing side understands.
        supported: i32,
    },
}

/// Value carried by a successful command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Nothing,
    Bool(bool),
    Long(i64),
    Outcome(ConsumeOutcome),
    ConsumptionProbe(ConsumptionProbe),
    EstimationProbe(EstimationProbe),
    Configuration(BucketConfiguration),
    Snapshot(RemoteBucketState),
    /// One result per sub-command, in input order.
    Multi(Vec<CommandResult>),
}

/// Result of executing one [`RemoteCommand`](super::RemoteCommand).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum CommandResult {
    Success { payload: Payload, state_modified: bool },
    BucketNotFound,
    /// The stored configuration is older than the version the caller asked for.
    ConfigurationNeedToBeReplaced,
    Error(RemoteError),
}

impl CommandResult {
    pub fn success(payload: Payload, state_modified: bool) -> Self {
        CommandResult::Success { payload, state_modified }
    }

    /// Success that did not touch the stored state.
    pub fn read_only(payload: Payload) -> Self {
        CommandResult::Success { payload, state_modified: false }
    }

    pub fn is_bucket_not_found(&self) -> bool {
        matches!(self, CommandResult::BucketNotFound)
    }

    pub fn is_configuration_need_to_be_replaced(&self) -> bool {
        matches!(self, CommandResult::ConfigurationNeedToBeReplaced)
    }

    pub fn is_state_modified(&self) -> bool {
        matches!(self, CommandResult::Success { state_modified: true, .. })
    }

    /// Whether the entry was missing and the command should be retried with initialization.
    ///
    /// A `Multi` qualifies when some sub-command hit a missing entry and none of them
    /// created it.
    pub fn needs_initialization(&self) -> bool {
        match self {
            CommandResult::BucketNotFound => true,
            CommandResult::Success { payload: Payload::Multi(results), state_modified: false } => {
                results.iter().any(CommandResult::needs_initialization)
            }
            _ => false,
        }
    }

    /// Whether this result, or any nested result, asks for configuration replacement.
    pub fn needs_configuration_replacement(&self) -> bool {
        match self {
            CommandResult::ConfigurationNeedToBeReplaced => true,
            CommandResult::Success { payload: Payload::Multi(results), .. } => {
                results.iter().any(CommandResult::needs_configuration_replacement)
            }
            _ => false,
        }
    }

    pub(crate) fn with_state_modified(self, modified: bool) -> Self {
        match self {
            CommandResult::Success { payload, state_modified } => {
                CommandResult::Success { payload, state_modified: state_modified || modified }
            }
            other => other,
        }
    }

    /// Payload of a successful result; every other variant becomes an error.
    pub fn into_payload(self) -> Result<Payload, ExecutionError> {
        match self {
            CommandResult::Success { payload, .. } => Ok(payload),
            CommandResult::BucketNotFound => Err(ExecutionError::BucketNotFound),
            CommandResult::ConfigurationNeedToBeReplaced => {
                Err(ExecutionError::UnexpectedResult { expected: "configuration already replaced" })
            }
            CommandResult::Error(err) => Err(ExecutionError::Remote(err)),
        }
    }

    pub fn into_bool(self) -> Result<bool, ExecutionError> {
        match self.into_payload()? {
            Payload::Bool(value) => Ok(value),
            _ => Err(ExecutionError::UnexpectedResult { expected: "bool" }),
        }
    }

    pub fn into_long(self) -> Result<i64, ExecutionError> {
        match self.into_payload()? {
            Payload::Long(value) => Ok(value),
            _ => Err(ExecutionError::UnexpectedResult { expected: "long" }),
        }
    }

    pub fn into_outcome(self) -> Result<ConsumeOutcome, ExecutionError> {
        match self.into_payload()? {
            Payload::Outcome(value) => Ok(value),
            _ => Err(ExecutionError::UnexpectedResult { expected: "consume outcome" }),
        }
    }

    pub fn into_consumption_probe(self) -> Result<ConsumptionProbe, ExecutionError> {
        match self.into_payload()? {
            Payload::ConsumptionProbe(value) => Ok(value),
            _ => Err(ExecutionError::UnexpectedResult { expected: "consumption probe" }),
        }
    }

    pub fn into_estimation_probe(self) -> Result<EstimationProbe, ExecutionError> {
        match self.into_payload()? {
            Payload::EstimationProbe(value) => Ok(value),
            _ => Err(ExecutionError::UnexpectedResult { expected: "estimation probe" }),
        }
    }

    pub fn into_configuration(self) -> Result<BucketConfiguration, ExecutionError> {
        match self.into_payload()? {
            Payload::Configuration(value) => Ok(value),
            _ => Err(ExecutionError::UnexpectedResult { expected: "configuration" }),
        }
    }

    pub fn into_snapshot(self) -> Result<RemoteBucketState, ExecutionError> {
        match self.into_payload()? {
            Payload::Snapshot(value) => Ok(value),
            _ => Err(ExecutionError::UnexpectedResult { expected: "snapshot" }),
        }
    }

    pub fn into_multi(self) -> Result<Vec<CommandResult>, ExecutionError> {
        match self.into_payload()? {
            Payload::Multi(value) => Ok(value),
            _ => Err(ExecutionError::UnexpectedResult { expected: "multi result" }),
        }
    }

    /// For commands that return nothing.
    pub fn into_unit(self) -> Result<(), ExecutionError> {
        self.into_payload().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors_reject_wrong_shape() {
        let result = CommandResult::read_only(Payload::Long(3));
        assert!(matches!(
            result.clone().into_bool(),
            Err(ExecutionError::UnexpectedResult { expected: "bool" })
        ));
        assert_eq!(result.into_long().unwrap(), 3);
    }

    #[test]
    fn not_found_and_remote_errors_map_to_execution_errors() {
        assert!(matches!(
            CommandResult::BucketNotFound.into_bool(),
            Err(ExecutionError::BucketNotFound)
        ));
        let err = CommandResult::Error(RemoteError::UnsupportedType { type_id: 77 })
            .into_unit()
            .unwrap_err();
        assert!(err.to_string().contains("77"));
    }

    #[test]
    fn multi_needs_initialization_only_when_nothing_was_created() {
        let missing = CommandResult::read_only(Payload::Multi(vec![
            CommandResult::read_only(Payload::Long(1)),
            CommandResult::BucketNotFound,
        ]));
        assert!(missing.needs_initialization());

        let created = CommandResult::success(
            Payload::Multi(vec![CommandResult::BucketNotFound]),
            true,
        );
        assert!(!created.needs_initialization());
    }

    #[test]
    fn json_form_is_adjacently_tagged() {
        let result = CommandResult::success(Payload::Bool(true), true);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["type"], "success");
        assert_eq!(json["body"]["payload"]["type"], "bool");
        let back: CommandResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
