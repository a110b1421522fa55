//! Uniform access to concrete CAN frame sources.
//!
//! Three transports feed the decoder: the kernel's SocketCAN interface, a
//! USB-serial adapter speaking CanDrive lines, and a TCP relay speaking the
//! same framing. All of them expose the same capability surface: `connect`
//! returns a bounded stream of frames, `send` writes one frame, `disconnect`
//! tears the source down and lets the receive task drain.
//!
//! Receive loops never block the producer: the ingress channel is bounded and
//! a full channel drops the newest frame with a logged warning.

pub mod serial;
pub mod socketcan;
pub mod tcp;

pub use serial::{SerialCan, SerialConfig};
pub use socketcan::KernelInterface;
pub use tcp::TcpCanClient;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::Result;
use crate::frame::Frame;
use crate::tracing::prelude::*;

/// Capacity of every transport ingress channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Push a received frame into the bounded ingress channel without blocking.
///
/// Returns `false` once the consumer side is gone, which ends the receive
/// loop.
pub(crate) fn forward_or_drop(tx: &mpsc::Sender<Frame>, frame: Frame, source: &str) -> bool {
    match tx.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(source, "rx channel full, dropping frame");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// A concrete CAN source behind the uniform capability surface.
pub enum CanBus {
    Kernel(KernelInterface),
    Serial(SerialCan),
    Tcp(TcpCanClient),
}

impl CanBus {
    pub fn kernel(interface: &str) -> Self {
        Self::Kernel(KernelInterface::new(interface))
    }

    pub fn serial(device: &str, config: SerialConfig) -> Self {
        Self::Serial(SerialCan::new(device, config))
    }

    pub fn tcp(host: &str, port: u16) -> Self {
        Self::Tcp(TcpCanClient::new(host, port))
    }

    /// Open the source and start its receive task.
    ///
    /// The returned channel ends when the underlying read fails or the
    /// transport is disconnected.
    pub async fn connect(&mut self) -> Result<mpsc::Receiver<Frame>> {
        match self {
            Self::Kernel(bus) => bus.connect().await,
            Self::Serial(bus) => bus.connect().await,
            Self::Tcp(bus) => bus.connect().await,
        }
    }

    /// Write one outgoing frame. No retry at this layer.
    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        match self {
            Self::Kernel(bus) => bus.send(frame).await,
            Self::Serial(bus) => bus.send(frame).await,
            Self::Tcp(bus) => bus.send(frame).await,
        }
    }

    /// Close the source and wait for the receive task to drain.
    pub async fn disconnect(&mut self) -> Result<()> {
        match self {
            Self::Kernel(bus) => bus.disconnect().await,
            Self::Serial(bus) => bus.disconnect().await,
            Self::Tcp(bus) => bus.disconnect().await,
        }
    }

    /// Human-readable name of the underlying device or endpoint.
    pub fn device(&self) -> String {
        match self {
            Self::Kernel(bus) => bus.interface().to_string(),
            Self::Serial(bus) => bus.device().to_string(),
            Self::Tcp(bus) => bus.endpoint(),
        }
    }
}
