/*!
 * A loaded DBC database with message lookup by name and by arbitration id
 */

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::can_decoder::{self, SignalsMap};
use crate::can_encoder;
use crate::can_frame::{CanFrame, CAN_EFF_MASK};
use crate::errors::{DecodeError, EncodeError, LoadError};

/// A parsed DBC file. Read-only once loaded.
#[derive(Debug)]
pub struct CanDatabase {
    dbc: can_dbc::DBC,
    path: PathBuf,
}

impl CanDatabase {
    /// Load and parse a DBC file. A file without messages is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<CanDatabase, LoadError> {
        let path = path.as_ref();
        let buffer = fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self::parse(&buffer, path)?;
        info!("Loaded {} messages from {:?}", db.dbc.messages().len(), path);
        Ok(db)
    }

    /// Parse DBC text held in memory.
    pub fn from_slice(buffer: &[u8]) -> Result<CanDatabase, LoadError> {
        Self::parse(buffer, Path::new("<memory>"))
    }

    fn parse(buffer: &[u8], path: &Path) -> Result<CanDatabase, LoadError> {
        let dbc = can_dbc::DBC::from_slice(buffer).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            reason: format!("{:?}", e),
        })?;
        if dbc.messages().is_empty() {
            return Err(LoadError::Empty {
                path: path.to_path_buf(),
            });
        }
        Ok(CanDatabase {
            dbc,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn messages(&self) -> impl Iterator<Item = MessageDefinition<'_>> {
        self.dbc.messages().iter().map(MessageDefinition::new)
    }

    pub fn message_by_name(&self, name: &str) -> Option<MessageDefinition<'_>> {
        self.messages().find(|m| m.name() == name)
    }

    /// Find a message by identifier.
    ///
    /// `id` is compared with the EFF bit included, as DBC files store extended
    /// ids. If nothing matches exactly, the 29-bit masked id is tried.
    pub fn message_by_id(&self, id: u32) -> Option<MessageDefinition<'_>> {
        self.messages()
            .find(|m| m.frame_id() == id)
            .or_else(|| {
                self.messages()
                    .find(|m| m.frame_id() & CAN_EFF_MASK == id & CAN_EFF_MASK)
            })
    }

    /// Decode a payload by arbitration id.
    pub fn decode(&self, id: u32, data: &[u8]) -> Result<SignalsMap, DecodeError> {
        let message = self
            .message_by_id(id)
            .ok_or(DecodeError::UnknownMessage(id))?;
        message.decode(data)
    }

    /// Decode a received data frame. Remote and error frames are refused
    /// before any lookup.
    pub fn decode_frame(&self, frame: &CanFrame) -> Result<SignalsMap, DecodeError> {
        if !frame.is_data() {
            return Err(DecodeError::NotADataFrame(frame.can_id));
        }
        self.decode(frame.message_id(), frame.payload())
    }
}

/// One message of a loaded database.
#[derive(Debug, Clone, Copy)]
pub struct MessageDefinition<'db> {
    spec: &'db can_dbc::Message,
}

impl<'db> MessageDefinition<'db> {
    fn new(spec: &'db can_dbc::Message) -> Self {
        MessageDefinition { spec }
    }

    pub fn spec(&self) -> &'db can_dbc::Message {
        self.spec
    }

    pub fn name(&self) -> &'db str {
        self.spec.message_name()
    }

    /// The identifier word as stored in the DBC, EFF bit set for extended ids.
    pub fn frame_id(&self) -> u32 {
        self.spec.message_id().raw()
    }

    pub fn size(&self) -> usize {
        *self.spec.message_size() as usize
    }

    pub fn signals(&self) -> impl Iterator<Item = &'db can_dbc::Signal> {
        self.spec.signals().iter()
    }

    pub fn signal(&self, name: &str) -> Option<&'db can_dbc::Signal> {
        self.signals().find(|s| s.name() == name)
    }

    pub fn encode(&self, signals: &SignalsMap) -> Result<Vec<u8>, EncodeError> {
        can_encoder::encode_message(self.spec, signals)
    }

    pub fn decode(&self, data: &[u8]) -> Result<SignalsMap, DecodeError> {
        can_decoder::decode_message(self.spec, data)
    }

    /// Encode `signals` into a frame carrying this message's identifier.
    pub fn frame(&self, signals: &SignalsMap) -> Result<CanFrame, EncodeError> {
        let data = self.encode(signals)?;
        let frame = CanFrame::new(self.frame_id(), &data);
        debug!("Encoded {} {} -> {}", self.name(), signals, frame);
        Ok(frame)
    }
}
