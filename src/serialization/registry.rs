use std::collections::HashMap;
use std::fmt;

use crate::command::RemoteCommand;
use crate::error::SerializationError;

use super::binary::{standard_decoders, Reader};
use super::Version;

/// Decodes the body of one command type. Nested commands are read back through the registry.
pub type CommandDecoder =
    fn(&mut Reader<'_>, &SerializationRegistry) -> Result<RemoteCommand, SerializationError>;

/// Explicit mapping from command type tag to decoder.
///
/// Built once at startup and passed by reference to whatever decodes commands. A registry
/// that lacks a tag (for example one modelling an older peer) rejects it with
/// [`SerializationError::UnknownTypeId`].
#[derive(Clone)]
pub struct SerializationRegistry {
    decoders: HashMap<u16, CommandDecoder>,
    max_version: Version,
}

impl SerializationRegistry {
    /// Every built-in command, reading up to [`Version::LATEST`].
    pub fn standard() -> Self {
        let mut registry = Self::empty(Version::LATEST);
        for (type_id, decoder) in standard_decoders() {
            registry.register(type_id, decoder);
        }
        registry
    }

    /// Registry with no decoders.
    pub fn empty(max_version: Version) -> Self {
        Self { decoders: HashMap::new(), max_version }
    }

    /// Add or replace the decoder for `type_id`.
    pub fn register(&mut self, type_id: u16, decoder: CommandDecoder) -> &mut Self {
        self.decoders.insert(type_id, decoder);
        self
    }

    /// Drop support for `type_id`.
    pub fn without(mut self, type_id: u16) -> Self {
        self.decoders.remove(&type_id);
        self
    }

    /// Cap the request version this registry accepts.
    pub fn with_max_version(mut self, max_version: Version) -> Self {
        self.max_version = max_version;
        self
    }

    pub fn max_version(&self) -> Version {
        self.max_version
    }

    pub fn supports(&self, type_id: u16) -> bool {
        self.decoders.contains_key(&type_id)
    }

    /// Read a tagged command from `reader`.
    pub fn read_command(&self, reader: &mut Reader<'_>) -> Result<RemoteCommand, SerializationError> {
        let type_id = reader.read_u16("command tag")?;
        let decoder = self.decoders.get(&type_id).ok_or(SerializationError::UnknownTypeId(type_id))?;
        decoder(reader, self)
    }
}

impl Default for SerializationRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for SerializationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut type_ids: Vec<_> = self.decoders.keys().copied().collect();
        type_ids.sort_unstable();
        f.debug_struct("SerializationRegistry")
            .field("type_ids", &type_ids)
            .field("max_version", &self.max_version)
            .finish()
    }
}
