use std::{error::Error, fmt::Display};

/// Errors that may occur when interpreting a packet.
#[derive(Debug)]
pub enum ParseError {
    /// The packet carried no bytes at all.
    EmptyPacket,
    /// The packet was shorter than the layout its command code requires.
    Truncated {
        command: u8,
        expected: usize,
        got: usize,
    },
    /// More bytes than fit in a single packet.
    OversizedPayload { max: usize, got: usize },
    /// A device-info record whose checksum byte does not match its contents.
    BadChecksum { expected: u8, got: u8 },
    /// A response packet that does not echo the command it answers.
    UnexpectedResponse { command: u8, got: Option<u8> },
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::EmptyPacket => write!(f, "Received an empty packet"),
            ParseError::Truncated {
                command,
                expected,
                got,
            } => write!(
                f,
                "Packet for command {:#04x} is truncated: need {} bytes, got {}",
                command, expected, got
            ),
            ParseError::OversizedPayload { max, got } => {
                write!(f, "Payload too large! Maximum is {}, but got {}", max, got)
            }
            ParseError::BadChecksum { expected, got } => write!(
                f,
                "Device info checksum mismatch: computed {:#04x}, record says {:#04x}",
                expected, got
            ),
            ParseError::UnexpectedResponse { command, got } => match got {
                Some(got) => write!(
                    f,
                    "Response echoes command {:#04x} instead of {:#04x}",
                    got, command
                ),
                None => write!(f, "Empty response to command {:#04x}", command),
            },
        }
    }
}

impl Error for ParseError {}
