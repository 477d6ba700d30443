//! Request envelope for running commands inside a storage-side processor.
//!
//! A client encodes a [`Request`]; the storage side hands the bytes and the stored blob to
//! [`process_request`], persists `new_state` when present and returns `response`.

use tracing::debug;

use crate::command::{BucketEntry, CommandResult, RemoteCommand, RemoteError};
use crate::error::SerializationError;
use crate::remote_state::RemoteBucketState;

use super::binary::{self, Reader, Writer};
use super::registry::SerializationRegistry;
use super::{type_id, Version, Versioned};

/// Command plus the context it must run with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Format the request (and the reply) is written in.
    pub version: Version,
    /// Client clock reading; the server clock is used when absent.
    pub client_time_nanos: Option<i64>,
    pub command: RemoteCommand,
}

impl Request {
    pub fn new(command: RemoteCommand, version: Version, client_time_nanos: Option<i64>) -> Self {
        Self { version, client_time_nanos, command }
    }
}

pub fn encode_request(request: &Request) -> Result<Vec<u8>, SerializationError> {
    request.command.check_version(request.version)?;
    let mut writer = Writer::blob(request.version, type_id::REQUEST);
    writer.write_opt_i64(request.client_time_nanos);
    binary::write_command(&mut writer, &request.command);
    Ok(writer.into_bytes())
}

/// Output of [`process_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedRequest {
    /// Encoded [`CommandResult`] for the caller.
    pub response: Vec<u8>,
    /// Encoded new state, present only when the command changed it.
    pub new_state: Option<Vec<u8>>,
    /// Decoded new state, for computing expiration.
    pub state: Option<RemoteBucketState>,
}

/// Execute an encoded request against an encoded stored state.
///
/// Requests from a newer format or with commands the registry does not know are answered
/// with [`CommandResult::Error`] instead of failing, so the client learns why. Corrupt input
/// is an error.
pub fn process_request(
    registry: &SerializationRegistry,
    request: &[u8],
    stored: Option<&[u8]>,
    server_now: i64,
) -> Result<ProcessedRequest, SerializationError> {
    let mut header = Reader::new(request, Version::MIN);
    let requested = header.read_i32("format version")?;
    let supported = registry.max_version().number();
    if requested > supported {
        debug!(requested, supported, "rejecting request from newer format");
        let error = CommandResult::Error(RemoteError::UnsupportedVersion { requested, supported });
        return Ok(ProcessedRequest {
            response: binary::encode_result(&error, registry.max_version())?,
            new_state: None,
            state: None,
        });
    }

    let (mut reader, _) = Reader::blob(request, Some(type_id::REQUEST))?;
    let version = reader.version();
    let client_time = reader.read_opt_i64("client time")?;
    let command = match registry.read_command(&mut reader) {
        Ok(command) => command,
        Err(SerializationError::UnknownTypeId(type_id)) => {
            debug!(type_id, "rejecting unsupported command type");
            let error = CommandResult::Error(RemoteError::UnsupportedType { type_id });
            return Ok(ProcessedRequest {
                response: binary::encode_result(&error, version)?,
                new_state: None,
                state: None,
            });
        }
        Err(err) => return Err(err),
    };
    reader.finish()?;

    let current = stored.map(binary::decode_state).transpose()?;
    let mut entry = BucketEntry::new(current);
    let result = command.execute(&mut entry, client_time.unwrap_or(server_now));

    let (new_state, state) = if entry.is_modified() {
        let state = entry.into_state();
        let bytes = state.as_ref().map(|s| binary::encode_state(s, version)).transpose()?;
        (bytes, state)
    } else {
        (None, None)
    };
    Ok(ProcessedRequest { response: binary::encode_result(&result, version)?, new_state, state })
}
