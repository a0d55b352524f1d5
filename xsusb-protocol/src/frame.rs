use crate::error::ParseError;

/// Largest number of payload bytes a packet can carry. This is the size of
/// the USB generic endpoint the protocol was designed for; bulk bit streams
/// are chunked into packets of this size.
pub const FRAME_PAYLOAD: usize = 64;

/// One protocol packet: up to [`FRAME_PAYLOAD`] bytes with an explicit
/// length. Packet boundaries carry meaning (a short packet ends a bulk
/// stream), so a `Frame` always knows how many of its bytes are live.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    len: usize,
    bytes: [u8; FRAME_PAYLOAD],
}

impl Frame {
    /// A zero-length packet.
    pub const fn empty() -> Frame {
        Frame {
            len: 0,
            bytes: [0; FRAME_PAYLOAD],
        }
    }

    /// Builds a frame from existing payload bytes.
    pub fn from_payload(payload: &[u8]) -> Result<Frame, ParseError> {
        if payload.len() > FRAME_PAYLOAD {
            return Err(ParseError::OversizedPayload {
                max: FRAME_PAYLOAD,
                got: payload.len(),
            });
        }
        let mut frame = Frame::empty();
        frame.bytes[..payload.len()].copy_from_slice(payload);
        frame.len = payload.len();
        Ok(frame)
    }

    /// The live payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// All [`FRAME_PAYLOAD`] bytes of backing storage, for callers that fill
    /// a frame in place before declaring its length with [`Frame::set_len`].
    pub fn bytes_mut(&mut self) -> &mut [u8; FRAME_PAYLOAD] {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Declares how many of the backing bytes are live.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds [`FRAME_PAYLOAD`].
    pub fn set_len(&mut self, len: usize) {
        assert!(len <= FRAME_PAYLOAD, "frame length {len} exceeds packet size");
        self.len = len;
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Appends bytes to the live payload.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<(), ParseError> {
        let end = self.len + bytes.len();
        if end > FRAME_PAYLOAD {
            return Err(ParseError::OversizedPayload {
                max: FRAME_PAYLOAD,
                got: end,
            });
        }
        self.bytes[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    /// The command code, when the frame has one.
    pub fn opcode(&self) -> Option<u8> {
        self.payload().first().copied()
    }
}

impl Default for Frame {
    fn default() -> Frame {
        Frame::empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn payload_tracks_length() {
        let mut frame = Frame::empty();
        assert!(frame.is_empty());
        frame.extend_from_slice(&[0x31, 0x00]).unwrap();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.payload(), &[0x31, 0x00]);
        assert_eq!(frame.opcode(), Some(0x31));
    }

    #[test]
    fn from_payload_round_trip() {
        let data = [0xA5; FRAME_PAYLOAD];
        let frame = Frame::from_payload(&data).unwrap();
        assert_eq!(frame.payload(), &data[..]);
    }

    #[test]
    fn oversized_payload_rejected() {
        let data = [0u8; FRAME_PAYLOAD + 1];
        match Frame::from_payload(&data) {
            Err(ParseError::OversizedPayload { max, got }) => {
                assert_eq!(max, FRAME_PAYLOAD);
                assert_eq!(got, FRAME_PAYLOAD + 1);
            }
            other => panic!("expected OversizedPayload, got {:?}", other),
        }
    }

    #[test]
    fn fill_in_place() {
        let mut frame = Frame::empty();
        frame.bytes_mut()[0] = 0x45;
        frame.bytes_mut()[1] = 0x08;
        frame.set_len(2);
        assert_eq!(frame.payload(), &[0x45, 0x08]);
    }
}
