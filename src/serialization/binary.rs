//! Binary blob codec.
//!
//! Layout of every top-level blob: `i32` format version (big-endian), `u16` type tag, body.
//! Nested polymorphic values (commands, results, payloads) carry their own `u16` tag.
//! Counts are `u32`, strings are `u32` length plus UTF-8, optionals are a `u8` presence flag.

use crate::bandwidth::{Bandwidth, BandwidthRepr};
use crate::command::{
    CommandResult, ConsumeOutcome, ConsumptionProbe, EstimationProbe, Payload, RemoteCommand,
    RemoteError,
};
use crate::config::{BucketConfiguration, TokensInheritanceStrategy};
use crate::error::SerializationError;
use crate::remote_state::{RemoteBucketState, RemoteStat};
use crate::state::{BandwidthState, BucketState};

use super::registry::{CommandDecoder, SerializationRegistry};
use super::{type_id, Version, Versioned};

/// Append-only encoder for one blob.
#[derive(Debug)]
pub struct Writer {
    buf: Vec<u8>,
    version: Version,
}

impl Writer {
    pub fn new(version: Version) -> Self {
        Self { buf: Vec::with_capacity(64), version }
    }

    /// Start a top-level blob: version number and type tag.
    pub(crate) fn blob(version: Version, tag: u16) -> Self {
        let mut writer = Self::new(version);
        writer.write_i32(version.number());
        writer.write_u16(tag);
        writer
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_opt_i64(&mut self, value: Option<i64>) {
        match value {
            Some(value) => {
                self.write_bool(true);
                self.write_i64(value);
            }
            None => self.write_bool(false),
        }
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_len(value.len());
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn write_len(&mut self, len: usize) {
        self.write_u32(u32::try_from(len).unwrap_or(u32::MAX));
    }
}

/// Cursor over one blob.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    version: Version,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], version: Version) -> Self {
        Self { buf, pos: 0, version }
    }

    /// Read the version header and check the type tag of a top-level blob.
    pub(crate) fn blob(buf: &'a [u8], expected_tag: Option<u16>) -> Result<(Self, u16), SerializationError> {
        let mut header = Reader::new(buf, Version::MIN);
        let version = Version::from_number(header.read_i32("format version")?)?;
        let tag = header.read_u16("type tag")?;
        if let Some(expected) = expected_tag {
            if tag != expected {
                return Err(SerializationError::InvalidData(format!(
                    "expected type {} but found {}",
                    expected, tag
                )));
            }
        }
        Ok((Reader { buf, pos: header.pos, version }, tag))
    }

    /// Format version the blob was written with.
    pub fn version(&self) -> Version {
        self.version
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], SerializationError> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let bytes = &self.buf[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            None => Err(SerializationError::UnexpectedEof(what)),
        }
    }

    fn take_array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], SerializationError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    pub fn read_u8(&mut self, what: &'static str) -> Result<u8, SerializationError> {
        Ok(self.take_array::<1>(what)?[0])
    }

    pub fn read_bool(&mut self, what: &'static str) -> Result<bool, SerializationError> {
        match self.read_u8(what)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SerializationError::InvalidData(format!("{} is not a bool: {}", what, other))),
        }
    }

    pub fn read_u16(&mut self, what: &'static str) -> Result<u16, SerializationError> {
        Ok(u16::from_be_bytes(self.take_array(what)?))
    }

    pub fn read_u32(&mut self, what: &'static str) -> Result<u32, SerializationError> {
        Ok(u32::from_be_bytes(self.take_array(what)?))
    }

    pub fn read_i32(&mut self, what: &'static str) -> Result<i32, SerializationError> {
        Ok(i32::from_be_bytes(self.take_array(what)?))
    }

    pub fn read_i64(&mut self, what: &'static str) -> Result<i64, SerializationError> {
        Ok(i64::from_be_bytes(self.take_array(what)?))
    }

    pub fn read_opt_i64(&mut self, what: &'static str) -> Result<Option<i64>, SerializationError> {
        if self.read_bool(what)? {
            Ok(Some(self.read_i64(what)?))
        } else {
            Ok(None)
        }
    }

    pub fn read_string(&mut self, what: &'static str) -> Result<String, SerializationError> {
        let len = self.read_u32(what)? as usize;
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SerializationError::InvalidData(format!("{} is not valid UTF-8", what)))
    }

    /// Read a `u32` element count.
    pub fn read_len(&mut self, what: &'static str) -> Result<usize, SerializationError> {
        Ok(self.read_u32(what)? as usize)
    }

    /// Fail if bytes are left over.
    pub fn finish(&self) -> Result<(), SerializationError> {
        if self.pos != self.buf.len() {
            return Err(SerializationError::InvalidData(format!(
                "{} trailing bytes",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Top-level blobs
// ---------------------------------------------------------------------------

/// Encode the stored form of a bucket.
pub fn encode_state(state: &RemoteBucketState, version: Version) -> Result<Vec<u8>, SerializationError> {
    state.check_version(version)?;
    let mut writer = Writer::blob(version, type_id::REMOTE_BUCKET_STATE);
    write_remote_state(&mut writer, state);
    Ok(writer.into_bytes())
}

pub fn decode_state(bytes: &[u8]) -> Result<RemoteBucketState, SerializationError> {
    let (mut reader, _) = Reader::blob(bytes, Some(type_id::REMOTE_BUCKET_STATE))?;
    let state = read_remote_state(&mut reader)?;
    reader.finish()?;
    Ok(state)
}

pub fn encode_command(command: &RemoteCommand, version: Version) -> Result<Vec<u8>, SerializationError> {
    command.check_version(version)?;
    let mut writer = Writer::new(version);
    writer.write_i32(version.number());
    write_command(&mut writer, command);
    Ok(writer.into_bytes())
}

pub fn decode_command(
    bytes: &[u8],
    registry: &SerializationRegistry,
) -> Result<RemoteCommand, SerializationError> {
    let mut header = Reader::new(bytes, Version::MIN);
    let version = Version::from_number(header.read_i32("format version")?)?;
    let mut reader = Reader { buf: bytes, pos: header.pos, version };
    let command = registry.read_command(&mut reader)?;
    reader.finish()?;
    Ok(command)
}

pub fn encode_result(result: &CommandResult, version: Version) -> Result<Vec<u8>, SerializationError> {
    result.check_version(version)?;
    let mut writer = Writer::new(version);
    writer.write_i32(version.number());
    write_result(&mut writer, result);
    Ok(writer.into_bytes())
}

pub fn decode_result(bytes: &[u8]) -> Result<CommandResult, SerializationError> {
    let mut header = Reader::new(bytes, Version::MIN);
    let version = Version::from_number(header.read_i32("format version")?)?;
    let mut reader = Reader { buf: bytes, pos: header.pos, version };
    let result = read_result(&mut reader)?;
    reader.finish()?;
    Ok(result)
}

// ---------------------------------------------------------------------------
// Configuration and state
// ---------------------------------------------------------------------------

const FLAG_INTERVALLY: u8 = 0b01;
const FLAG_ADAPTIVE: u8 = 0b10;

fn write_bandwidth(writer: &mut Writer, bandwidth: &Bandwidth) {
    writer.write_i64(bandwidth.capacity());
    writer.write_i64(bandwidth.initial_tokens());
    writer.write_i64(bandwidth.refill_period_nanos());
    writer.write_i64(bandwidth.refill_tokens());
    let mut flags = 0;
    if bandwidth.is_refill_intervally() {
        flags |= FLAG_INTERVALLY;
    }
    if bandwidth.is_use_adaptive_initial_tokens() {
        flags |= FLAG_ADAPTIVE;
    }
    writer.write_u8(flags);
    writer.write_opt_i64(bandwidth.time_of_first_refill_millis());
    if writer.version() >= Version::V2 {
        match bandwidth.id() {
            Some(id) => {
                writer.write_bool(true);
                writer.write_str(id);
            }
            None => writer.write_bool(false),
        }
    }
}

fn read_bandwidth(reader: &mut Reader<'_>) -> Result<Bandwidth, SerializationError> {
    let capacity = reader.read_i64("bandwidth capacity")?;
    let initial_tokens = reader.read_i64("bandwidth initial tokens")?;
    let refill_period_nanos = reader.read_i64("bandwidth refill period")?;
    let refill_tokens = reader.read_i64("bandwidth refill tokens")?;
    let flags = reader.read_u8("bandwidth flags")?;
    let time_of_first_refill_millis = reader.read_opt_i64("bandwidth first refill")?;
    let id = if reader.version() >= Version::V2 && reader.read_bool("bandwidth id flag")? {
        Some(reader.read_string("bandwidth id")?)
    } else {
        None
    };
    Bandwidth::try_from(BandwidthRepr {
        capacity,
        initial_tokens,
        refill_period_nanos,
        refill_tokens,
        refill_intervally: flags & FLAG_INTERVALLY != 0,
        time_of_first_refill_millis,
        use_adaptive_initial_tokens: flags & FLAG_ADAPTIVE != 0,
        id,
    })
    .map_err(|err| SerializationError::InvalidData(err.to_string()))
}

fn write_configuration(writer: &mut Writer, configuration: &BucketConfiguration) {
    writer.write_len(configuration.len());
    for bandwidth in configuration.bandwidths() {
        write_bandwidth(writer, bandwidth);
    }
}

fn read_configuration(reader: &mut Reader<'_>) -> Result<BucketConfiguration, SerializationError> {
    let count = reader.read_len("bandwidth count")?;
    let mut bandwidths = Vec::new();
    for _ in 0..count {
        bandwidths.push(read_bandwidth(reader)?);
    }
    BucketConfiguration::new(bandwidths).map_err(|err| SerializationError::InvalidData(err.to_string()))
}

fn write_bucket_state(writer: &mut Writer, state: &BucketState) {
    writer.write_len(state.slots().len());
    for slot in state.slots() {
        writer.write_i64(slot.tokens);
        writer.write_i64(slot.last_refill_nanos);
        writer.write_i64(slot.rounding_error);
    }
}

fn read_bucket_state(reader: &mut Reader<'_>) -> Result<BucketState, SerializationError> {
    let count = reader.read_len("slot count")?;
    let mut slots = Vec::new();
    for _ in 0..count {
        slots.push(BandwidthState {
            tokens: reader.read_i64("slot tokens")?,
            last_refill_nanos: reader.read_i64("slot last refill")?,
            rounding_error: reader.read_i64("slot rounding error")?,
        });
    }
    Ok(BucketState::from_slots(slots))
}

fn write_remote_state(writer: &mut Writer, state: &RemoteBucketState) {
    write_configuration(writer, state.configuration());
    write_bucket_state(writer, state.state());
    writer.write_i64(state.consumed_tokens());
    if writer.version() >= Version::V2 {
        writer.write_opt_i64(state.configuration_version());
    }
}

fn read_remote_state(reader: &mut Reader<'_>) -> Result<RemoteBucketState, SerializationError> {
    let configuration = read_configuration(reader)?;
    let state = read_bucket_state(reader)?;
    let consumed = reader.read_i64("consumed tokens")?;
    let configuration_version = if reader.version() >= Version::V2 {
        reader.read_opt_i64("configuration version")?
    } else {
        None
    };
    RemoteBucketState::from_parts(configuration, state, RemoteStat::new(consumed), configuration_version)
}

fn write_strategy(writer: &mut Writer, strategy: TokensInheritanceStrategy) {
    writer.write_u8(strategy.code());
}

fn read_strategy(reader: &mut Reader<'_>) -> Result<TokensInheritanceStrategy, SerializationError> {
    let code = reader.read_u8("inheritance strategy")?;
    TokensInheritanceStrategy::from_code(code)
        .ok_or_else(|| SerializationError::InvalidData(format!("unknown inheritance strategy {}", code)))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Type tag of a command variant.
pub fn command_type_id(command: &RemoteCommand) -> u16 {
    match command {
        RemoteCommand::TryConsume { .. } => type_id::TRY_CONSUME,
        RemoteCommand::Consume { .. } => type_id::CONSUME,
        RemoteCommand::TryConsumeAndReturnRemaining { .. } => type_id::TRY_CONSUME_AND_RETURN_REMAINING,
        RemoteCommand::ConsumeAsMuchAsPossible { .. } => type_id::CONSUME_AS_MUCH_AS_POSSIBLE,
        RemoteCommand::EstimateAbilityToConsume { .. } => type_id::ESTIMATE_ABILITY_TO_CONSUME,
        RemoteCommand::GetAvailableTokens => type_id::GET_AVAILABLE_TOKENS,
        RemoteCommand::ReserveAndCalculateTimeToSleep { .. } => type_id::RESERVE_AND_CALCULATE_TIME_TO_SLEEP,
        RemoteCommand::AddTokens { .. } => type_id::ADD_TOKENS,
        RemoteCommand::ForceAddTokens { .. } => type_id::FORCE_ADD_TOKENS,
        RemoteCommand::ConsumeIgnoringRateLimits { .. } => type_id::CONSUME_IGNORING_RATE_LIMITS,
        RemoteCommand::Reset => type_id::RESET,
        RemoteCommand::ReplaceConfiguration { .. } => type_id::REPLACE_CONFIGURATION,
        RemoteCommand::GetConfiguration => type_id::GET_CONFIGURATION,
        RemoteCommand::CreateSnapshot => type_id::CREATE_SNAPSHOT,
        RemoteCommand::Sync { .. } => type_id::SYNC,
        RemoteCommand::CreateInitialStateAndExecute { .. } => type_id::CREATE_INITIAL_STATE_AND_EXECUTE,
        RemoteCommand::CheckConfigurationVersionAndExecute { .. } => {
            type_id::CHECK_CONFIGURATION_VERSION_AND_EXECUTE
        }
        RemoteCommand::InitOrReplaceConfigurationAndExecute { .. } => {
            type_id::INIT_OR_REPLACE_CONFIGURATION_AND_EXECUTE
        }
        RemoteCommand::Multi { .. } => type_id::MULTI,
    }
}

/// Write a command with its type tag.
pub(crate) fn write_command(writer: &mut Writer, command: &RemoteCommand) {
    writer.write_u16(command_type_id(command));
    match command {
        RemoteCommand::TryConsume { tokens }
        | RemoteCommand::Consume { tokens }
        | RemoteCommand::TryConsumeAndReturnRemaining { tokens }
        | RemoteCommand::EstimateAbilityToConsume { tokens }
        | RemoteCommand::AddTokens { tokens }
        | RemoteCommand::ForceAddTokens { tokens }
        | RemoteCommand::ConsumeIgnoringRateLimits { tokens } => writer.write_i64(*tokens),
        RemoteCommand::ConsumeAsMuchAsPossible { limit } => writer.write_i64(*limit),
        RemoteCommand::ReserveAndCalculateTimeToSleep { tokens, max_wait_nanos } => {
            writer.write_i64(*tokens);
            writer.write_i64(*max_wait_nanos);
        }
        RemoteCommand::GetAvailableTokens
        | RemoteCommand::Reset
        | RemoteCommand::GetConfiguration
        | RemoteCommand::CreateSnapshot => {}
        RemoteCommand::ReplaceConfiguration { configuration, strategy } => {
            write_configuration(writer, configuration);
            write_strategy(writer, *strategy);
        }
        RemoteCommand::Sync { unsynchronized_tokens, nanos_since_last_sync } => {
            writer.write_i64(*unsynchronized_tokens);
            writer.write_i64(*nanos_since_last_sync);
        }
        RemoteCommand::CreateInitialStateAndExecute { configuration, command } => {
            write_configuration(writer, configuration);
            write_command(writer, command);
        }
        RemoteCommand::CheckConfigurationVersionAndExecute { desired_version, command } => {
            writer.write_i64(*desired_version);
            write_command(writer, command);
        }
        RemoteCommand::InitOrReplaceConfigurationAndExecute {
            configuration,
            desired_version,
            strategy,
            command,
        } => {
            write_configuration(writer, configuration);
            writer.write_i64(*desired_version);
            write_strategy(writer, *strategy);
            write_command(writer, command);
        }
        RemoteCommand::Multi { commands } => {
            writer.write_len(commands.len());
            for command in commands {
                write_command(writer, command);
            }
        }
    }
}

fn nested(reader: &mut Reader<'_>, registry: &SerializationRegistry) -> Result<Box<RemoteCommand>, SerializationError> {
    registry.read_command(reader).map(Box::new)
}

fn decoder(type_id: u16, decode: CommandDecoder) -> (u16, CommandDecoder) {
    (type_id, decode)
}

/// Decoders for every built-in command, keyed by type tag.
pub(crate) fn standard_decoders() -> Vec<(u16, CommandDecoder)> {
    vec![
        decoder(type_id::TRY_CONSUME, |r, _| Ok(RemoteCommand::TryConsume { tokens: r.read_i64("tokens")? })),
        decoder(type_id::CONSUME, |r, _| Ok(RemoteCommand::Consume { tokens: r.read_i64("tokens")? })),
        decoder(type_id::TRY_CONSUME_AND_RETURN_REMAINING, |r, _| {
            Ok(RemoteCommand::TryConsumeAndReturnRemaining { tokens: r.read_i64("tokens")? })
        }),
        decoder(type_id::CONSUME_AS_MUCH_AS_POSSIBLE, |r, _| {
            Ok(RemoteCommand::ConsumeAsMuchAsPossible { limit: r.read_i64("limit")? })
        }),
        decoder(type_id::ESTIMATE_ABILITY_TO_CONSUME, |r, _| {
            Ok(RemoteCommand::EstimateAbilityToConsume { tokens: r.read_i64("tokens")? })
        }),
        decoder(type_id::GET_AVAILABLE_TOKENS, |_, _| Ok(RemoteCommand::GetAvailableTokens)),
        decoder(type_id::RESERVE_AND_CALCULATE_TIME_TO_SLEEP, |r, _| {
            Ok(RemoteCommand::ReserveAndCalculateTimeToSleep {
                tokens: r.read_i64("tokens")?,
                max_wait_nanos: r.read_i64("max wait")?,
            })
        }),
        decoder(type_id::ADD_TOKENS, |r, _| Ok(RemoteCommand::AddTokens { tokens: r.read_i64("tokens")? })),
        decoder(type_id::FORCE_ADD_TOKENS, |r, _| {
            Ok(RemoteCommand::ForceAddTokens { tokens: r.read_i64("tokens")? })
        }),
        decoder(type_id::CONSUME_IGNORING_RATE_LIMITS, |r, _| {
            Ok(RemoteCommand::ConsumeIgnoringRateLimits { tokens: r.read_i64("tokens")? })
        }),
        decoder(type_id::RESET, |_, _| Ok(RemoteCommand::Reset)),
        decoder(type_id::REPLACE_CONFIGURATION, |r, _| {
            Ok(RemoteCommand::ReplaceConfiguration {
                configuration: read_configuration(r)?,
                strategy: read_strategy(r)?,
            })
        }),
        decoder(type_id::GET_CONFIGURATION, |_, _| Ok(RemoteCommand::GetConfiguration)),
        decoder(type_id::CREATE_SNAPSHOT, |_, _| Ok(RemoteCommand::CreateSnapshot)),
        decoder(type_id::SYNC, |r, _| {
            r.version().require(Version::V2, "sync command")?;
            Ok(RemoteCommand::Sync {
                unsynchronized_tokens: r.read_i64("unsynchronized tokens")?,
                nanos_since_last_sync: r.read_i64("nanos since last sync")?,
            })
        }),
        decoder(type_id::CREATE_INITIAL_STATE_AND_EXECUTE, |r, registry| {
            Ok(RemoteCommand::CreateInitialStateAndExecute {
                configuration: read_configuration(r)?,
                command: nested(r, registry)?,
            })
        }),
        decoder(type_id::CHECK_CONFIGURATION_VERSION_AND_EXECUTE, |r, registry| {
            r.version().require(Version::V2, "check configuration version command")?;
            Ok(RemoteCommand::CheckConfigurationVersionAndExecute {
                desired_version: r.read_i64("desired version")?,
                command: nested(r, registry)?,
            })
        }),
        decoder(type_id::INIT_OR_REPLACE_CONFIGURATION_AND_EXECUTE, |r, registry| {
            r.version().require(Version::V2, "init or replace configuration command")?;
            Ok(RemoteCommand::InitOrReplaceConfigurationAndExecute {
                configuration: read_configuration(r)?,
                desired_version: r.read_i64("desired version")?,
                strategy: read_strategy(r)?,
                command: nested(r, registry)?,
            })
        }),
        decoder(type_id::MULTI, |r, registry| {
            let count = r.read_len("command count")?;
            let mut commands = Vec::new();
            for _ in 0..count {
                commands.push(registry.read_command(r)?);
            }
            Ok(RemoteCommand::Multi { commands })
        }),
    ]
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

pub(crate) fn write_result(writer: &mut Writer, result: &CommandResult) {
    match result {
        CommandResult::Success { payload, state_modified } => {
            writer.write_u16(type_id::RESULT_SUCCESS);
            write_payload(writer, payload);
            writer.write_bool(*state_modified);
        }
        CommandResult::BucketNotFound => writer.write_u16(type_id::RESULT_BUCKET_NOT_FOUND),
        CommandResult::ConfigurationNeedToBeReplaced => {
            writer.write_u16(type_id::RESULT_CONFIGURATION_NEED_TO_BE_REPLACED)
        }
        CommandResult::Error(error) => {
            writer.write_u16(type_id::RESULT_ERROR);
            match error {
                RemoteError::UnsupportedType { type_id } => {
                    writer.write_u8(0);
                    writer.write_u16(*type_id);
                }
                RemoteError::UnsupportedVersion { requested, supported } => {
                    writer.write_u8(1);
                    writer.write_i32(*requested);
                    writer.write_i32(*supported);
                }
            }
        }
    }
}

pub(crate) fn read_result(reader: &mut Reader<'_>) -> Result<CommandResult, SerializationError> {
    match reader.read_u16("result tag")? {
        type_id::RESULT_SUCCESS => {
            let payload = read_payload(reader)?;
            let state_modified = reader.read_bool("state modified")?;
            Ok(CommandResult::Success { payload, state_modified })
        }
        type_id::RESULT_BUCKET_NOT_FOUND => Ok(CommandResult::BucketNotFound),
        type_id::RESULT_CONFIGURATION_NEED_TO_BE_REPLACED => {
            Ok(CommandResult::ConfigurationNeedToBeReplaced)
        }
        type_id::RESULT_ERROR => match reader.read_u8("error kind")? {
            0 => Ok(CommandResult::Error(RemoteError::UnsupportedType {
                type_id: reader.read_u16("type id")?,
            })),
            1 => Ok(CommandResult::Error(RemoteError::UnsupportedVersion {
                requested: reader.read_i32("requested version")?,
                supported: reader.read_i32("supported version")?,
            })),
            other => Err(SerializationError::InvalidData(format!("unknown error kind {}", other))),
        },
        other => Err(SerializationError::UnknownTypeId(other)),
    }
}

fn write_payload(writer: &mut Writer, payload: &Payload) {
    match payload {
        Payload::Nothing => writer.write_u16(type_id::PAYLOAD_NOTHING),
        Payload::Bool(value) => {
            writer.write_u16(type_id::PAYLOAD_BOOL);
            writer.write_bool(*value);
        }
        Payload::Long(value) => {
            writer.write_u16(type_id::PAYLOAD_LONG);
            writer.write_i64(*value);
        }
        Payload::Outcome(outcome) => {
            writer.write_u16(type_id::PAYLOAD_OUTCOME);
            match outcome {
                ConsumeOutcome::Consumed { remaining } => {
                    writer.write_bool(true);
                    writer.write_i64(*remaining);
                }
                ConsumeOutcome::Insufficient { available } => {
                    writer.write_bool(false);
                    writer.write_i64(*available);
                }
            }
        }
        Payload::ConsumptionProbe(probe) => {
            writer.write_u16(type_id::PAYLOAD_CONSUMPTION_PROBE);
            writer.write_bool(probe.consumed);
            writer.write_i64(probe.remaining_tokens);
            writer.write_i64(probe.nanos_to_wait_for_refill);
            writer.write_i64(probe.nanos_to_wait_for_reset);
        }
        Payload::EstimationProbe(probe) => {
            writer.write_u16(type_id::PAYLOAD_ESTIMATION_PROBE);
            writer.write_bool(probe.can_be_consumed);
            writer.write_i64(probe.remaining_tokens);
            writer.write_i64(probe.nanos_to_wait_for_refill);
        }
        Payload::Configuration(configuration) => {
            writer.write_u16(type_id::PAYLOAD_CONFIGURATION);
            write_configuration(writer, configuration);
        }
        Payload::Snapshot(state) => {
            writer.write_u16(type_id::PAYLOAD_SNAPSHOT);
            write_remote_state(writer, state);
        }
        Payload::Multi(results) => {
            writer.write_u16(type_id::PAYLOAD_MULTI);
            writer.write_len(results.len());
            for result in results {
                write_result(writer, result);
            }
        }
    }
}

fn read_payload(reader: &mut Reader<'_>) -> Result<Payload, SerializationError> {
    match reader.read_u16("payload tag")? {
        type_id::PAYLOAD_NOTHING => Ok(Payload::Nothing),
        type_id::PAYLOAD_BOOL => Ok(Payload::Bool(reader.read_bool("bool payload")?)),
        type_id::PAYLOAD_LONG => Ok(Payload::Long(reader.read_i64("long payload")?)),
        type_id::PAYLOAD_OUTCOME => {
            let consumed = reader.read_bool("outcome kind")?;
            let value = reader.read_i64("outcome tokens")?;
            Ok(Payload::Outcome(if consumed {
                ConsumeOutcome::Consumed { remaining: value }
            } else {
                ConsumeOutcome::Insufficient { available: value }
            }))
        }
        type_id::PAYLOAD_CONSUMPTION_PROBE => Ok(Payload::ConsumptionProbe(ConsumptionProbe {
            consumed: reader.read_bool("probe consumed")?,
            remaining_tokens: reader.read_i64("probe remaining")?,
            nanos_to_wait_for_refill: reader.read_i64("probe refill wait")?,
            nanos_to_wait_for_reset: reader.read_i64("probe reset wait")?,
        })),
        type_id::PAYLOAD_ESTIMATION_PROBE => Ok(Payload::EstimationProbe(EstimationProbe {
            can_be_consumed: reader.read_bool("probe can be consumed")?,
            remaining_tokens: reader.read_i64("probe remaining")?,
            nanos_to_wait_for_refill: reader.read_i64("probe refill wait")?,
        })),
        type_id::PAYLOAD_CONFIGURATION => Ok(Payload::Configuration(read_configuration(reader)?)),
        type_id::PAYLOAD_SNAPSHOT => Ok(Payload::Snapshot(read_remote_state(reader)?)),
        type_id::PAYLOAD_MULTI => {
            let count = reader.read_len("result count")?;
            let mut results = Vec::new();
            for _ in 0..count {
                results.push(read_result(reader)?);
            }
            Ok(Payload::Multi(results))
        }
        other => Err(SerializationError::UnknownTypeId(other)),
    }
}
