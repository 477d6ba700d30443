//! Versioned encoding of bucket state, commands and results.
//!
//! Two forms are supported:
//! - a compact binary blob (`i32` big-endian format version, `u16` type tag, body), which
//!   is what every backend stores;
//! - a JSON envelope `{"version", "type", "body"}` for export and diagnostics.
//!
//! Each value knows the lowest format [`Version`] able to express it. Writing a value for an
//! older version fails with [`SerializationError::UnsupportedForVersion`] instead of dropping
//! data; reading a blob from an unknown version fails with
//! [`SerializationError::UnsupportedVersion`].

pub mod binary;
mod json;
mod registry;
mod request;
#[cfg(test)]
pub(crate) mod samples;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::command::{CommandResult, Payload, RemoteCommand};
use crate::config::BucketConfiguration;
use crate::error::SerializationError;
use crate::remote_state::RemoteBucketState;

pub use binary::{
    decode_command, decode_result, decode_state, encode_command, encode_result, encode_state,
    Reader, Writer,
};
pub use json::{from_json, from_json_str, to_json, to_json_string, JsonSnapshot};
pub use registry::{CommandDecoder, SerializationRegistry};
pub use request::{encode_request, process_request, ProcessedRequest, Request};

/// Format version of persisted and wire data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Version {
    /// Base format.
    V1,
    /// Adds bandwidth ids, configuration versions and the sync/versioned-replacement commands.
    V2,
}

impl Version {
    /// Oldest version this build reads and writes.
    pub const MIN: Version = Version::V1;
    /// Version written by default.
    pub const LATEST: Version = Version::V2;

    pub fn number(self) -> i32 {
        match self {
            Version::V1 => 1,
            Version::V2 => 2,
        }
    }

    pub fn from_number(number: i32) -> Result<Self, SerializationError> {
        match number {
            1 => Ok(Version::V1),
            2 => Ok(Version::V2),
            found => Err(SerializationError::UnsupportedVersion {
                found,
                min: Version::MIN.number(),
                max: Version::LATEST.number(),
            }),
        }
    }

    /// Fail when `self` cannot express `what`, introduced in `required`.
    pub(crate) fn require(self, required: Version, what: &'static str) -> Result<(), SerializationError> {
        if self < required {
            return Err(SerializationError::UnsupportedForVersion {
                what,
                required: required.number(),
                target: self.number(),
            });
        }
        Ok(())
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::LATEST
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.number())
    }
}

impl TryFrom<i32> for Version {
    type Error = SerializationError;

    fn try_from(number: i32) -> Result<Self, Self::Error> {
        Version::from_number(number)
    }
}

impl From<Version> for i32 {
    fn from(version: Version) -> Self {
        version.number()
    }
}

/// Lowest format version able to represent a value, with the feature that demands it.
pub trait Versioned {
    fn required_version(&self) -> (Version, &'static str);

    /// Fail when the value cannot be written as `target`.
    fn check_version(&self, target: Version) -> Result<(), SerializationError> {
        let (required, what) = self.required_version();
        target.require(required, what)
    }
}

const BASE: (Version, &str) = (Version::V1, "base format");

fn newest(a: (Version, &'static str), b: (Version, &'static str)) -> (Version, &'static str) {
    if b.0 > a.0 {
        b
    } else {
        a
    }
}

impl Versioned for BucketConfiguration {
    fn required_version(&self) -> (Version, &'static str) {
        if self.has_ids() {
            (Version::V2, "bandwidth id")
        } else {
            BASE
        }
    }
}

impl Versioned for RemoteBucketState {
    fn required_version(&self) -> (Version, &'static str) {
        let version = if self.configuration_version().is_some() {
            (Version::V2, "configuration version")
        } else {
            BASE
        };
        newest(self.configuration().required_version(), version)
    }
}

impl Versioned for RemoteCommand {
    fn required_version(&self) -> (Version, &'static str) {
        match self {
            RemoteCommand::Sync { .. } => (Version::V2, "sync command"),
            RemoteCommand::CheckConfigurationVersionAndExecute { .. } => {
                (Version::V2, "check configuration version command")
            }
            RemoteCommand::InitOrReplaceConfigurationAndExecute { .. } => {
                (Version::V2, "init or replace configuration command")
            }
            RemoteCommand::ReplaceConfiguration { configuration, .. } => {
                configuration.required_version()
            }
            RemoteCommand::CreateInitialStateAndExecute { configuration, command } => {
                newest(configuration.required_version(), command.required_version())
            }
            RemoteCommand::Multi { commands } => commands
                .iter()
                .map(RemoteCommand::required_version)
                .fold(BASE, newest),
            _ => BASE,
        }
    }
}

impl Versioned for Payload {
    fn required_version(&self) -> (Version, &'static str) {
        match self {
            Payload::Configuration(configuration) => configuration.required_version(),
            Payload::Snapshot(state) => state.required_version(),
            Payload::Multi(results) => {
                results.iter().map(CommandResult::required_version).fold(BASE, newest)
            }
            _ => BASE,
        }
    }
}

impl Versioned for CommandResult {
    fn required_version(&self) -> (Version, &'static str) {
        match self {
            CommandResult::Success { payload, .. } => payload.required_version(),
            CommandResult::ConfigurationNeedToBeReplaced => {
                (Version::V2, "configuration replacement result")
            }
            _ => BASE,
        }
    }
}

/// Type tags used in blobs.
pub mod type_id {
    pub const REMOTE_BUCKET_STATE: u16 = 1;
    pub const REQUEST: u16 = 2;

    pub const TRY_CONSUME: u16 = 20;
    pub const CONSUME: u16 = 21;
    pub const TRY_CONSUME_AND_RETURN_REMAINING: u16 = 22;
    pub const CONSUME_AS_MUCH_AS_POSSIBLE: u16 = 23;
    pub const ESTIMATE_ABILITY_TO_CONSUME: u16 = 24;
    pub const GET_AVAILABLE_TOKENS: u16 = 25;
    pub const RESERVE_AND_CALCULATE_TIME_TO_SLEEP: u16 = 26;
    pub const ADD_TOKENS: u16 = 27;
    pub const FORCE_ADD_TOKENS: u16 = 28;
    pub const CONSUME_IGNORING_RATE_LIMITS: u16 = 29;
    pub const RESET: u16 = 30;
    pub const REPLACE_CONFIGURATION: u16 = 31;
    pub const GET_CONFIGURATION: u16 = 32;
    pub const CREATE_SNAPSHOT: u16 = 33;
    pub const SYNC: u16 = 34;
    pub const CREATE_INITIAL_STATE_AND_EXECUTE: u16 = 35;
    pub const CHECK_CONFIGURATION_VERSION_AND_EXECUTE: u16 = 36;
    pub const INIT_OR_REPLACE_CONFIGURATION_AND_EXECUTE: u16 = 37;
    pub const MULTI: u16 = 38;

    pub const RESULT_SUCCESS: u16 = 50;
    pub const RESULT_BUCKET_NOT_FOUND: u16 = 51;
    pub const RESULT_CONFIGURATION_NEED_TO_BE_REPLACED: u16 = 52;
    pub const RESULT_ERROR: u16 = 53;

    pub const PAYLOAD_NOTHING: u16 = 60;
    pub const PAYLOAD_BOOL: u16 = 61;
    pub const PAYLOAD_LONG: u16 = 62;
    pub const PAYLOAD_OUTCOME: u16 = 63;
    pub const PAYLOAD_CONSUMPTION_PROBE: u16 = 64;
    pub const PAYLOAD_ESTIMATION_PROBE: u16 = 65;
    pub const PAYLOAD_CONFIGURATION: u16 = 66;
    pub const PAYLOAD_SNAPSHOT: u16 = 67;
    pub const PAYLOAD_MULTI: u16 = 68;
}
