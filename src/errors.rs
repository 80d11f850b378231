/*!
 * Error types for database loading, trace parsing, encoding/decoding and adapter control
 */

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::adapter::AdapterMode;

/// The DBC database could not be loaded.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("unable to read database {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to parse database {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("database {path:?} defines no messages")]
    Empty { path: PathBuf },
}

/// A payload could not be turned into signal values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("no message with arbitration id 0x{0:X}")]
    UnknownMessage(u32),
    #[error("message {message} needs {expected} bytes, got {actual}")]
    PayloadTooShort {
        message: String,
        expected: usize,
        actual: usize,
    },
    #[error("frame 0x{0:X} is a remote or error frame and carries no signals")]
    NotADataFrame(u32),
}

/// Signal values could not be turned into a payload.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("no message named {0}")]
    UnknownMessage(String),
    #[error("message {message} has no signal {signal}")]
    UnknownSignal { message: String, signal: String },
    #[error("message {message} is missing a value for {signal}")]
    MissingSignal { message: String, signal: String },
    #[error("{signal} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        signal: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// A trace line could not be parsed.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("unexpected end of line")]
    UnexpectedEndOfLine,
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("invalid arbitration id {0:?}")]
    InvalidId(String),
    #[error("invalid payload {0:?}")]
    InvalidData(String),
    #[error("CAN FD records are not supported")]
    FdUnsupported,
}

/// The USB transport could not be enumerated.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("usb transport unavailable")]
    Transport(#[from] rusb::Error),
}

/// A driver-level adapter failure.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error(transparent)]
    Usb(#[from] rusb::Error),
    #[error("no bit timing reaches {bitrate} bit/s from a {clock} Hz clock")]
    UnsupportedBitrate { bitrate: u32, clock: u32 },
    #[error("device does not support {0:?} mode")]
    UnsupportedMode(AdapterMode),
    #[error("adapter has not been started")]
    NotStarted,
    #[error("short usb transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },
}

/// Session setup failed; the session never carries traffic.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("unable to set bit rate {bitrate}")]
    Bitrate {
        bitrate: u32,
        #[source]
        source: AdapterError,
    },
    #[error("unable to start in {mode:?} mode")]
    Start {
        mode: AdapterMode,
        #[source]
        source: AdapterError,
    },
    #[error("session must be configured before it is started")]
    NotConfigured,
}
