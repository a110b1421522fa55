//! JSON wire contracts for external forwarder sinks.
//!
//! Outbound sinks (a WebSocket broadcaster, a bench logger) receive either a
//! decoded signal event or a raw frame. The shapes here are the stable
//! boundary; the sinks themselves live outside this crate.

use serde::{Deserialize, Serialize};

use crate::frame::Frame;
use crate::signal::{SignalEvent, Value};

/// The signal payload of a decoded event message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub unit: String,
    pub name: String,
    pub value: Value,
}

/// A decoded signal event, tagged with the device it was observed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedMessage {
    pub device: String,
    pub message: SignalMessage,
}

impl DecodedMessage {
    pub fn new(device: &str, event: &SignalEvent) -> Self {
        Self {
            device: device.to_string(),
            message: SignalMessage {
                unit: event.unit.clone(),
                name: event.name.clone(),
                value: event.value.clone(),
            },
        }
    }
}

/// A raw frame with hex-encoded payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrameMessage {
    #[serde(rename = "arbitrationID")]
    pub arbitration_id: u32,
    #[serde(rename = "DLC")]
    pub dlc: u8,
    pub data: String,
}

impl From<&Frame> for RawFrameMessage {
    fn from(frame: &Frame) -> Self {
        Self {
            arbitration_id: frame.arbitration_id(),
            dlc: frame.dlc(),
            data: hex::encode(frame.payload()),
        }
    }
}
