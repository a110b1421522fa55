//! TCP relay client speaking CanDrive lines.
//!
//! Connects to a remote forwarder that mirrors a CAN bus over TCP, one frame
//! per line.

use std::io;

use futures::SinkExt;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::candrive::CanDriveCodec;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::tracing::prelude::*;
use crate::transport::{forward_or_drop, DEFAULT_CHANNEL_CAPACITY};

/// A CanDrive frame relay reachable over TCP.
pub struct TcpCanClient {
    host: String,
    port: u16,
    writer: Option<FramedWrite<WriteHalf<TcpStream>, CanDriveCodec>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl TcpCanClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            writer: None,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub async fn connect(&mut self) -> Result<mpsc::Receiver<Frame>> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(Error::TransportOpen)?;

        let (reader, writer) = tokio::io::split(stream);
        self.writer = Some(FramedWrite::new(writer, CanDriveCodec));

        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let shutdown = self.shutdown.clone();
        let endpoint = self.endpoint();

        self.tracker
            .spawn(receive_loop(reader, tx, shutdown, endpoint));
        self.tracker.close();

        Ok(rx)
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        match &mut self.writer {
            Some(writer) => writer.send(*frame).await,
            None => Err(Error::TransportIo(io::Error::new(
                io::ErrorKind::NotConnected,
                "relay not connected",
            ))),
        }
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(mut writer) = self.writer.take() {
            // The peer may already be gone; the socket is released either way.
            if let Err(err) = writer.close().await {
                debug!(endpoint = %self.endpoint(), error = %err, "close failed");
            }
        }
        self.tracker.wait().await;
        Ok(())
    }
}

async fn receive_loop(
    reader: ReadHalf<TcpStream>,
    tx: mpsc::Sender<Frame>,
    shutdown: CancellationToken,
    endpoint: String,
) {
    let mut frames = FramedRead::new(reader, CanDriveCodec);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            item = frames.next() => match item {
                Some(Ok(frame)) => {
                    if !forward_or_drop(&tx, frame, &endpoint) {
                        break;
                    }
                }
                Some(Err(err)) => {
                    error!(endpoint = %endpoint, error = %err, "relay read failed");
                    break;
                }
                None => {
                    debug!(endpoint = %endpoint, "relay closed the connection");
                    break;
                }
            },
        }
    }
}
