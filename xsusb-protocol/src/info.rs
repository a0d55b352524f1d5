//! The device-info record returned by the `Info` command.

use crate::error::ParseError;
use crate::frame::{FRAME_PAYLOAD, Frame};

/// Length of the description field: whatever is left of a full packet after
/// the command echo, the two identifiers and the checksum byte.
pub const DESCRIPTION_LEN: usize = FRAME_PAYLOAD - 1 - 2 - 2 - 1;

/// Static metadata describing the bridge, sent back as a full packet:
/// command echo, product id, version id, NUL-padded description string and a
/// trailing checksum byte.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceInfo {
    pub product_id: u16,
    pub version_id: u16,
    pub description: String,
}

impl Default for DeviceInfo {
    fn default() -> DeviceInfo {
        DeviceInfo {
            product_id: 0x0200,
            version_id: 0x0101,
            description: "XSUSB BRG:01.01".to_string(),
        }
    }
}

/// Wrapping byte sum used as the record checksum. The final record byte is
/// the checksum of every byte before it.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

impl DeviceInfo {
    /// Encodes the full response packet, echoing `opcode` in byte 0.
    pub fn encode(&self, opcode: u8, frame: &mut Frame) {
        frame.clear();
        let bytes = frame.bytes_mut();
        bytes.fill(0);
        bytes[0] = opcode;
        bytes[1..3].copy_from_slice(&self.product_id.to_le_bytes());
        bytes[3..5].copy_from_slice(&self.version_id.to_le_bytes());
        let desc = self.description.as_bytes();
        let desc_len = desc.len().min(DESCRIPTION_LEN);
        bytes[5..5 + desc_len].copy_from_slice(&desc[..desc_len]);
        bytes[FRAME_PAYLOAD - 1] = checksum(&bytes[..FRAME_PAYLOAD - 1]);
        frame.set_len(FRAME_PAYLOAD);
    }

    /// Decodes and checksum-verifies a response packet.
    pub fn decode(frame: &Frame) -> Result<DeviceInfo, ParseError> {
        let payload = frame.payload();
        if payload.len() < FRAME_PAYLOAD {
            return Err(ParseError::Truncated {
                command: payload.first().copied().unwrap_or(0),
                expected: FRAME_PAYLOAD,
                got: payload.len(),
            });
        }
        let computed = checksum(&payload[..FRAME_PAYLOAD - 1]);
        let stored = payload[FRAME_PAYLOAD - 1];
        if computed != stored {
            return Err(ParseError::BadChecksum {
                expected: computed,
                got: stored,
            });
        }
        let desc = &payload[5..5 + DESCRIPTION_LEN];
        let desc_end = desc.iter().position(|b| *b == 0).unwrap_or(desc.len());
        Ok(DeviceInfo {
            product_id: u16::from_le_bytes(payload[1..3].try_into().unwrap()),
            version_id: u16::from_le_bytes(payload[3..5].try_into().unwrap()),
            description: String::from_utf8_lossy(&desc[..desc_end]).to_string(),
        })
    }
}
