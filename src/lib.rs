/*!
 * CAN trace decoding against DBC databases, and a transmit/receive round trip
 * harness for USB-to-CAN adapters.
 */

pub mod adapter;
pub mod can_database;
pub mod can_decoder;
pub mod can_encoder;
pub mod can_frame;
pub mod errors;
pub mod gs_usb;
pub mod harness;
pub mod log_decode;
pub mod scenarios;
pub mod session;
pub mod signal_layout;
pub mod trace_reader;
pub mod virtual_adapter;

pub use adapter::{AdapterMode, CanAdapter};
pub use can_database::{CanDatabase, MessageDefinition};
pub use can_decoder::SignalsMap;
pub use can_frame::CanFrame;
pub use errors::{
    AdapterError, ConfigurationError, DecodeError, DiscoveryError, EncodeError, LoadError, TraceError,
};
pub use harness::{Classification, FrameClassifier, HarnessConfig, IdClassifier, RoundTrip, RunReport};
pub use log_decode::{decode_log, DecodedRecord, LogDecoder};
pub use session::{Session, SessionState};
pub use trace_reader::{TraceFormat, TraceReader, TraceRecord};
pub use virtual_adapter::VirtualAdapter;
