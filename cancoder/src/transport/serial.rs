//! USB-serial CAN adapter speaking CanDrive lines.

use std::io;

use futures::SinkExt;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::candrive::CanDriveCodec;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::tracing::prelude::*;
use crate::transport::{forward_or_drop, DEFAULT_CHANNEL_CAPACITY};

/// Serial port parameters. The defaults match the common 25 kBd CanDrive
/// adapter setup: 8 data bits, no parity, one stop bit.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baud: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud: 25_000,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl SerialConfig {
    pub fn with_baud(baud: u32) -> Self {
        Self {
            baud,
            ..Self::default()
        }
    }
}

/// A serial CAN adapter on a tty device.
pub struct SerialCan {
    device: String,
    config: SerialConfig,
    writer: Option<FramedWrite<WriteHalf<SerialStream>, CanDriveCodec>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl SerialCan {
    pub fn new(device: &str, config: SerialConfig) -> Self {
        Self {
            device: device.to_string(),
            config,
            writer: None,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub async fn connect(&mut self) -> Result<mpsc::Receiver<Frame>> {
        let port = tokio_serial::new(&self.device, self.config.baud)
            .data_bits(self.config.data_bits)
            .parity(self.config.parity)
            .stop_bits(self.config.stop_bits)
            .open_native_async()
            .map_err(|err| Error::TransportOpen(err.into()))?;

        let (reader, writer) = tokio::io::split(port);
        self.writer = Some(FramedWrite::new(writer, CanDriveCodec));

        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let shutdown = self.shutdown.clone();
        let device = self.device.clone();

        self.tracker
            .spawn(receive_loop(reader, tx, shutdown, device));
        self.tracker.close();

        Ok(rx)
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        match &mut self.writer {
            Some(writer) => writer.send(*frame).await,
            None => Err(Error::TransportIo(io::Error::new(
                io::ErrorKind::NotConnected,
                "serial port not connected",
            ))),
        }
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(mut writer) = self.writer.take() {
            // The adapter may already be unplugged; the port is released
            // either way.
            if let Err(err) = writer.close().await {
                debug!(device = %self.device, error = %err, "close failed");
            }
        }
        self.tracker.wait().await;
        Ok(())
    }
}

async fn receive_loop(
    reader: ReadHalf<SerialStream>,
    tx: mpsc::Sender<Frame>,
    shutdown: CancellationToken,
    device: String,
) {
    let mut frames = FramedRead::new(reader, CanDriveCodec);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            item = frames.next() => match item {
                Some(Ok(frame)) => {
                    if !forward_or_drop(&tx, frame, &device) {
                        break;
                    }
                }
                Some(Err(err)) => {
                    error!(device = %device, error = %err, "serial read failed");
                    break;
                }
                None => {
                    debug!(device = %device, "serial stream ended");
                    break;
                }
            },
        }
    }
}
