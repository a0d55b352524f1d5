//! Length-prefixed packet framing for byte-stream transports.
//!
//! A packet travels as one length byte (0..=64) followed by that many
//! payload bytes, which preserves short-packet boundaries on a stream. This
//! module provides the framing as a `tokio_util` codec pair for async
//! transports; the synchronous service loop implements the same framing
//! directly.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{FRAME_PAYLOAD, Frame};

/// Codec for length-prefixed packets.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        let Some(&len_byte) = src.first() else {
            return Ok(None);
        };
        let len = len_byte as usize;
        if len > FRAME_PAYLOAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame length {len} exceeds packet size {FRAME_PAYLOAD}"),
            ));
        }
        if src.len() < 1 + len {
            src.reserve(1 + len - src.len());
            return Ok(None);
        }
        src.advance(1);
        let payload = src.split_to(len);
        let frame = Frame::from_payload(&payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.reserve(1 + frame.len());
        dst.put_u8(frame.len() as u8);
        dst.put_slice(frame.payload());
        Ok(())
    }
}
