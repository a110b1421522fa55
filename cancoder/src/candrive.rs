//! CanDrive line framing.
//!
//! The ASCII protocol spoken by the USB-serial adapter and the TCP relay:
//! one frame per newline-terminated line, `arbid_hex,RTR,IDE,data_hex`. The
//! arbitration ID is marshalled as four big-endian bytes; the RTR and IDE
//! flags are carried but not interpreted.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};
use crate::frame::{Frame, MAX_FRAME_DATA};
use crate::tracing::prelude::*;

/// Parse one CanDrive line (without or with its trailing newline) into a
/// frame.
///
/// A single leading 0x00 byte is tolerated; some adapters emit one after
/// wakeup.
pub fn unmarshal(input: &[u8]) -> Result<Frame> {
    let input = input.strip_prefix(&[0x00]).unwrap_or(input);

    let line = std::str::from_utf8(input)
        .map_err(|_| Error::FrameMalformed("line is not valid ASCII".into()))?
        .trim();

    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 4 {
        return Err(Error::FrameMalformed(format!(
            "expected 4 comma-separated fields, got {} in `{line}`",
            fields.len()
        )));
    }

    let arbitration_id = u32::from_str_radix(fields[0], 16).map_err(|err| {
        Error::FrameMalformed(format!("arbitration id `{}`: {err}", fields[0]))
    })?;

    let payload = hex::decode(fields[3])
        .map_err(|err| Error::FrameMalformed(format!("data `{}`: {err}", fields[3])))?;
    if payload.len() > MAX_FRAME_DATA {
        return Err(Error::FrameMalformed(format!(
            "data length {} exceeds 8 bytes",
            payload.len()
        )));
    }

    Frame::new(arbitration_id, &payload)
}

/// Render a frame as one CanDrive line, RTR and IDE zero.
pub fn marshal(frame: &Frame) -> Vec<u8> {
    format!(
        "{:08x},0,0,{}\n",
        frame.arbitration_id(),
        hex::encode(frame.payload())
    )
    .into_bytes()
}

/// Streaming codec for CanDrive lines over a byte transport.
///
/// Malformed lines are logged and skipped rather than failing the stream;
/// decode errors are reserved for the underlying I/O.
#[derive(Debug, Default)]
pub struct CanDriveCodec;

impl Decoder for CanDriveCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        while let Some(pos) = src.iter().position(|&b| b == b'\n') {
            let line = src.split_to(pos + 1);
            let line = &line[..line.len() - 1];
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            match unmarshal(line) {
                Ok(frame) => return Ok(Some(frame)),
                Err(err) => {
                    warn!(error = %err, "discarding malformed CanDrive line");
                }
            }
        }
        Ok(None)
    }
}

impl Encoder<Frame> for CanDriveCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&marshal(&frame));
        Ok(())
    }
}
