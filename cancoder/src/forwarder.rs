//! Forwarder glue: one transport wired to one decoder.
//!
//! The forwarder owns the producer task that pulls frames off the transport
//! and pushes them through the decoder, and the write path that routes signal
//! writes through the encoder back onto the bus. Consumers talk to a running
//! forwarder through its handle: decoded-event subscriptions, raw-frame
//! subscriptions and outbound sends.

use std::io;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::decoder::Decoder;
use crate::error::{Error, Result};
use crate::fanout::FanOut;
use crate::frame::Frame;
use crate::signal::{SignalEvent, SignalMapping, SignalTable};
use crate::tracing::prelude::*;
use crate::transport::{CanBus, DEFAULT_CHANNEL_CAPACITY};

enum Command {
    SendRaw(Frame),
    Write(Box<SignalMapping>),
}

pub struct Forwarder {
    bus: CanBus,
    decoder: Decoder,
    raw: FanOut<Frame>,
}

impl Forwarder {
    pub fn new(bus: CanBus, table: SignalTable) -> Self {
        Self {
            bus,
            decoder: Decoder::new(table),
            raw: FanOut::new("raw"),
        }
    }

    /// Open a decoded-event subscription before the forwarder starts.
    pub fn subscribe(&self) -> mpsc::Receiver<SignalEvent> {
        self.decoder.subscribe()
    }

    /// Open a raw-frame subscription before the forwarder starts.
    pub fn subscribe_raw(&self) -> mpsc::Receiver<Frame> {
        self.raw.subscribe()
    }

    /// Connect the transport and start the dispatch task.
    ///
    /// A transport-open failure is fatal to the forwarder and returned here;
    /// once running, an I/O failure ends the receive stream and the dispatch
    /// task drains out on its own.
    pub async fn start(mut self) -> Result<ForwarderHandle> {
        let device = self.bus.device();
        let frame_rx = self.bus.connect().await?;

        let events = self.decoder.subscriptions();
        let raw = self.raw.clone();
        let (command_tx, command_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        tracker.spawn(dispatch(
            self.bus,
            self.decoder,
            frame_rx,
            command_rx,
            raw.clone(),
            shutdown.clone(),
            device.clone(),
        ));
        tracker.close();

        Ok(ForwarderHandle {
            device,
            events,
            raw,
            command_tx,
            shutdown,
            tracker,
        })
    }
}

/// Control surface of a running forwarder.
pub struct ForwarderHandle {
    device: String,
    events: FanOut<SignalEvent>,
    raw: FanOut<Frame>,
    command_tx: mpsc::Sender<Command>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl ForwarderHandle {
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Bounded stream of decoded signal events.
    pub fn subscribe(&self) -> mpsc::Receiver<SignalEvent> {
        self.events.subscribe()
    }

    /// Bounded stream of every frame seen on the bus, decoded or not.
    pub fn subscribe_raw(&self) -> mpsc::Receiver<Frame> {
        self.raw.subscribe()
    }

    /// Relay one raw frame onto the bus.
    pub async fn send_raw(&self, frame: Frame) -> Result<()> {
        self.command(Command::SendRaw(frame)).await
    }

    /// Encode a byte-literal signal mapping and send the resulting frame.
    pub async fn write(&self, mapping: SignalMapping) -> Result<()> {
        self.command(Command::Write(Box::new(mapping))).await
    }

    async fn command(&self, command: Command) -> Result<()> {
        self.command_tx.send(command).await.map_err(|_| {
            Error::TransportIo(io::Error::new(
                io::ErrorKind::NotConnected,
                "forwarder stopped",
            ))
        })
    }

    /// Ask the dispatch task to stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the dispatch task has drained and released the transport.
    pub async fn join(&self) {
        self.tracker.wait().await;
    }
}

async fn dispatch(
    mut bus: CanBus,
    mut decoder: Decoder,
    mut frame_rx: mpsc::Receiver<Frame>,
    mut command_rx: mpsc::Receiver<Command>,
    raw: FanOut<Frame>,
    shutdown: CancellationToken,
    device: String,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            maybe_frame = frame_rx.recv() => match maybe_frame {
                Some(frame) => {
                    raw.emit(&frame);
                    let decoded = decoder.push(&frame);
                    if let Some(err) = decoded.first_error {
                        warn!(device = %device, error = %err, "frame decoded with errors");
                    }
                }
                None => {
                    info!(device = %device, "receive stream ended");
                    break;
                }
            },
            Some(command) = command_rx.recv() => {
                let outcome = match command {
                    Command::SendRaw(frame) => bus.send(&frame).await,
                    Command::Write(mapping) => match Decoder::encode(&mapping) {
                        Ok(frame) => bus.send(&frame).await,
                        Err(err) => Err(err),
                    },
                };
                if let Err(err) = outcome {
                    warn!(device = %device, error = %err, "outbound send failed");
                }
            }
        }
    }

    if let Err(err) = bus.disconnect().await {
        warn!(device = %device, error = %err, "disconnect failed");
    }

    // Closing the transport closes downstream subscriptions.
    decoder.subscriptions().close();
    raw.close();
}
