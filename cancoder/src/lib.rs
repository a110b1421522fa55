//! Declarative CAN bus signal codec.
//!
//! `cancoder` ingests frames from a CAN source (kernel SocketCAN, USB-serial
//! adapter, TCP relay), applies a declarative table of signal mappings to
//! each frame and fans decoded events out to bounded subscriber channels.
//! The same tables drive the write path: byte-literal calculations encode
//! back into raw frames.
//!
//! The moving parts, bottom up:
//!
//! - [`frame`]: the 8-byte frame data model
//! - [`candrive`]: the ASCII line framing used by non-native transports
//! - [`expr`]: the condition/calculation expression sublanguage
//! - [`signal`]: signal definitions and ordered tables
//! - [`decoder`]: the decode/encode core with event fan-out
//! - [`transport`]: the uniform `CanBus` capability surface
//! - [`forwarder`]: one transport wired to one decoder
//! - [`tables`]: built-in vehicle profiles

pub mod candrive;
pub mod decoder;
pub mod error;
pub mod expr;
pub mod fanout;
pub mod forwarder;
pub mod frame;
pub mod messages;
pub mod signal;
pub mod tables;
pub mod tracing;
pub mod transport;

pub use decoder::{Decoded, Decoder};
pub use error::{Error, Result};
pub use forwarder::{Forwarder, ForwarderHandle};
pub use frame::Frame;
pub use signal::{SignalDefinition, SignalEvent, SignalMapping, SignalTable, Value};
pub use transport::CanBus;
