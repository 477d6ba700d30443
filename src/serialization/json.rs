use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::command::{CommandResult, RemoteCommand};
use crate::error::SerializationError;
use crate::remote_state::RemoteBucketState;

use super::{Version, Versioned};

/// Values that have a JSON envelope form.
pub trait JsonSnapshot: Serialize + DeserializeOwned + Versioned {
    /// Value of the envelope's `type` field.
    const TYPE: &'static str;
}

impl JsonSnapshot for RemoteBucketState {
    const TYPE: &'static str = "remote_bucket_state";
}

impl JsonSnapshot for RemoteCommand {
    const TYPE: &'static str = "remote_command";
}

impl JsonSnapshot for CommandResult {
    const TYPE: &'static str = "command_result";
}

/// Wrap `value` in a `{"version", "type", "body"}` envelope.
pub fn to_json<T: JsonSnapshot>(value: &T, version: Version) -> Result<Value, SerializationError> {
    value.check_version(version)?;
    Ok(json!({
        "version": version.number(),
        "type": T::TYPE,
        "body": serde_json::to_value(value)?,
    }))
}

/// Unwrap and validate an envelope produced by [`to_json`].
pub fn from_json<T: JsonSnapshot>(mut envelope: Value) -> Result<T, SerializationError> {
    let number = envelope
        .get("version")
        .and_then(Value::as_i64)
        .ok_or_else(|| SerializationError::InvalidData("missing numeric \"version\"".into()))?;
    let number = i32::try_from(number)
        .map_err(|_| SerializationError::InvalidData(format!("version {} out of range", number)))?;
    let version = Version::from_number(number)?;

    let type_name = envelope.get("type").and_then(Value::as_str).unwrap_or_default();
    if type_name != T::TYPE {
        return Err(SerializationError::InvalidData(format!(
            "expected type \"{}\" but found \"{}\"",
            T::TYPE,
            type_name
        )));
    }

    let body = envelope
        .get_mut("body")
        .map(Value::take)
        .ok_or_else(|| SerializationError::InvalidData("missing \"body\"".into()))?;
    let value: T = serde_json::from_value(body)?;
    value.check_version(version)?;
    Ok(value)
}

pub fn to_json_string<T: JsonSnapshot>(value: &T, version: Version) -> Result<String, SerializationError> {
    Ok(serde_json::to_string(&to_json(value, version)?)?)
}

pub fn from_json_str<T: JsonSnapshot>(text: &str) -> Result<T, SerializationError> {
    from_json(serde_json::from_str(text)?)
}
