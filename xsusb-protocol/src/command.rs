//! Command packet layouts.
//!
//! Byte 0 of every packet is the command code; the rest of the packet is a
//! command-specific layout, so a packet is effectively a tagged union keyed
//! on its first byte. Multi-byte integers are little-endian.

use crate::error::ParseError;
use crate::frame::Frame;

/// Size of the command header at the start of the first TAP-sequence packet:
/// command code, 4-byte bit count, flag byte. Stream payload begins at this
/// offset in the first packet and at offset 0 in every following packet.
pub const TAP_SEQ_HDR_LEN: usize = 6;

/// Command codes understood by the bridge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Opcode {
    /// Blink the status LED so the board can be picked out on a bench.
    Identify = 0x31,
    /// Reserved, accepted and ignored.
    UpdateLed = 0x32,
    /// Return the device-info record.
    Info = 0x40,
    /// Sense inverting buffers on the secondary port's TCK/TDO lines.
    SenseInverters = 0x41,
    /// Drive TMS and TDI, pulse TCK once.
    PulseTmsTdi = 0x42,
    /// Same, and return the TDO level sampled before the pulse.
    PulseTmsTdiTdo = 0x43,
    /// Bulk stream: TDI bits out, TDO bits back.
    ShiftTdiTdo = 0x44,
    /// Bulk stream: TDO bits back only.
    ShiftTdo = 0x45,
    /// Bulk stream: TDI bits out only.
    ShiftTdi = 0x46,
    /// Pulse TCK a given number of times.
    RunTest = 0x47,
    /// Read and discard a declared number of stream bits to resynchronize.
    NullTdi = 0x48,
    /// Set the FPGA PROG# pin level.
    SetProg = 0x49,
    /// Drive a byte-wide test vector through a mask.
    SingleTestVector = 0x4A,
    /// Read back the test vector currently driven.
    GetTestVector = 0x4B,
    /// Program the board oscillator divisor.
    SetOscFrequency = 0x4C,
    /// Re-enable default command responses on the secondary channel.
    EnableReturn = 0x4D,
    /// Suppress default command responses on the secondary channel.
    DisableReturn = 0x4E,
    /// General TAP sequence: TMS/TDI streams and TDO collection per flags.
    TapSequence = 0x4F,
    /// Full device reset.
    Reset = 0xFF,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        Some(match byte {
            0x31 => Opcode::Identify,
            0x32 => Opcode::UpdateLed,
            0x40 => Opcode::Info,
            0x41 => Opcode::SenseInverters,
            0x42 => Opcode::PulseTmsTdi,
            0x43 => Opcode::PulseTmsTdiTdo,
            0x44 => Opcode::ShiftTdiTdo,
            0x45 => Opcode::ShiftTdo,
            0x46 => Opcode::ShiftTdi,
            0x47 => Opcode::RunTest,
            0x48 => Opcode::NullTdi,
            0x49 => Opcode::SetProg,
            0x4A => Opcode::SingleTestVector,
            0x4B => Opcode::GetTestVector,
            0x4C => Opcode::SetOscFrequency,
            0x4D => Opcode::EnableReturn,
            0x4E => Opcode::DisableReturn,
            0x4F => Opcode::TapSequence,
            0xFF => Opcode::Reset,
            _ => return None,
        })
    }
}

/// Flag field of the TAP-sequence command.
///
/// The stream carries TMS and/or TDI bytes depending on the `*_in_stream`
/// bits; a line without stream bytes holds the corresponding `static_*`
/// level for the whole sequence. When both TMS and TDI bytes are present
/// they interleave as a TMS byte followed by a TDI byte for each 8 bits.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SeqFlags {
    pub collect_tdo: bool,
    pub tms_in_stream: bool,
    pub static_tms: bool,
    pub tdi_in_stream: bool,
    pub static_tdi: bool,
    /// Informational marker set by hosts when the sequence spans packets.
    pub multi_packet: bool,
}

impl SeqFlags {
    pub const GET_TDO: u8 = 0x01;
    pub const PUT_TMS: u8 = 0x02;
    pub const TMS_VAL: u8 = 0x04;
    pub const PUT_TDI: u8 = 0x08;
    pub const TDI_VAL: u8 = 0x10;
    pub const MULTI_PACKET: u8 = 0x80;

    pub fn from_byte(byte: u8) -> SeqFlags {
        SeqFlags {
            collect_tdo: byte & Self::GET_TDO != 0,
            tms_in_stream: byte & Self::PUT_TMS != 0,
            static_tms: byte & Self::TMS_VAL != 0,
            tdi_in_stream: byte & Self::PUT_TDI != 0,
            static_tdi: byte & Self::TDI_VAL != 0,
            multi_packet: byte & Self::MULTI_PACKET != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut byte = 0;
        if self.collect_tdo {
            byte |= Self::GET_TDO;
        }
        if self.tms_in_stream {
            byte |= Self::PUT_TMS;
        }
        if self.static_tms {
            byte |= Self::TMS_VAL;
        }
        if self.tdi_in_stream {
            byte |= Self::PUT_TDI;
        }
        if self.static_tdi {
            byte |= Self::TDI_VAL;
        }
        if self.multi_packet {
            byte |= Self::MULTI_PACKET;
        }
        byte
    }

    /// Stream payload bytes consumed per 8 bits of the sequence.
    pub fn bytes_per_octet(&self) -> usize {
        usize::from(self.tms_in_stream) + usize::from(self.tdi_in_stream)
    }
}

/// A decoded command packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Identify,
    UpdateLed,
    Info,
    SenseInverters,
    PulseTmsTdi { tms: bool, tdi: bool },
    PulseTmsTdiTdo { tms: bool, tdi: bool },
    ShiftTdiTdo { num_bits: u32 },
    ShiftTdo { num_bits: u32 },
    ShiftTdi { num_bits: u32 },
    RunTest { num_pulses: u32 },
    NullTdi { num_bits: u32 },
    SetProg { level: bool },
    SingleTestVector { vector: u8, mask: u8 },
    GetTestVector,
    SetOscFrequency { divisor: u16, external: bool },
    EnableReturn,
    DisableReturn,
    TapSequence { num_bits: u32, flags: SeqFlags },
    Reset,
    /// A command code this implementation does not know. Ignored by devices.
    Unknown(u8),
}

fn need(payload: &[u8], command: u8, expected: usize) -> Result<(), ParseError> {
    if payload.len() < expected {
        return Err(ParseError::Truncated {
            command,
            expected,
            got: payload.len(),
        });
    }
    Ok(())
}

fn read_u32(payload: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(payload[offset..offset + 4].try_into().unwrap())
}

fn read_u16(payload: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(payload[offset..offset + 2].try_into().unwrap())
}

impl Command {
    /// Decodes the command header of a packet.
    ///
    /// Stream payload bytes that follow a header (TAP sequences) are not
    /// copied out; callers slice them from the frame at [`TAP_SEQ_HDR_LEN`].
    pub fn parse(frame: &Frame) -> Result<Command, ParseError> {
        let payload = frame.payload();
        let Some(&code) = payload.first() else {
            return Err(ParseError::EmptyPacket);
        };
        let Some(opcode) = Opcode::from_byte(code) else {
            return Ok(Command::Unknown(code));
        };
        let command = match opcode {
            Opcode::Identify => Command::Identify,
            Opcode::UpdateLed => Command::UpdateLed,
            Opcode::Info => Command::Info,
            Opcode::SenseInverters => Command::SenseInverters,
            Opcode::PulseTmsTdi | Opcode::PulseTmsTdiTdo => {
                need(payload, code, 2)?;
                let tms = payload[1] & 0x01 != 0;
                let tdi = payload[1] & 0x02 != 0;
                if opcode == Opcode::PulseTmsTdi {
                    Command::PulseTmsTdi { tms, tdi }
                } else {
                    Command::PulseTmsTdiTdo { tms, tdi }
                }
            }
            Opcode::ShiftTdiTdo => {
                need(payload, code, 5)?;
                Command::ShiftTdiTdo {
                    num_bits: read_u32(payload, 1),
                }
            }
            Opcode::ShiftTdo => {
                need(payload, code, 5)?;
                Command::ShiftTdo {
                    num_bits: read_u32(payload, 1),
                }
            }
            Opcode::ShiftTdi => {
                need(payload, code, 5)?;
                Command::ShiftTdi {
                    num_bits: read_u32(payload, 1),
                }
            }
            Opcode::RunTest => {
                need(payload, code, 5)?;
                Command::RunTest {
                    num_pulses: read_u32(payload, 1),
                }
            }
            Opcode::NullTdi => {
                need(payload, code, 5)?;
                Command::NullTdi {
                    num_bits: read_u32(payload, 1),
                }
            }
            Opcode::SetProg => {
                need(payload, code, 2)?;
                Command::SetProg {
                    level: payload[1] & 0x01 != 0,
                }
            }
            Opcode::SingleTestVector => {
                need(payload, code, 3)?;
                Command::SingleTestVector {
                    vector: payload[1],
                    mask: payload[2],
                }
            }
            Opcode::GetTestVector => Command::GetTestVector,
            Opcode::SetOscFrequency => {
                need(payload, code, 4)?;
                Command::SetOscFrequency {
                    divisor: read_u16(payload, 1),
                    external: payload[3] != 0,
                }
            }
            Opcode::EnableReturn => Command::EnableReturn,
            Opcode::DisableReturn => Command::DisableReturn,
            Opcode::TapSequence => {
                need(payload, code, TAP_SEQ_HDR_LEN)?;
                Command::TapSequence {
                    num_bits: read_u32(payload, 1),
                    flags: SeqFlags::from_byte(payload[5]),
                }
            }
            Opcode::Reset => Command::Reset,
        };
        Ok(command)
    }

    /// Writes this command's header into `frame`, replacing its contents.
    ///
    /// For TAP sequences the caller appends stream payload bytes after the
    /// header; bulk shift commands carry their payload in later packets.
    pub fn encode(&self, frame: &mut Frame) {
        frame.clear();
        let bytes = frame.bytes_mut();
        let len = match *self {
            Command::Identify => {
                bytes[0] = Opcode::Identify as u8;
                1
            }
            Command::UpdateLed => {
                bytes[0] = Opcode::UpdateLed as u8;
                1
            }
            Command::Info => {
                bytes[0] = Opcode::Info as u8;
                1
            }
            Command::SenseInverters => {
                bytes[0] = Opcode::SenseInverters as u8;
                1
            }
            Command::PulseTmsTdi { tms, tdi } | Command::PulseTmsTdiTdo { tms, tdi } => {
                bytes[0] = if matches!(self, Command::PulseTmsTdi { .. }) {
                    Opcode::PulseTmsTdi as u8
                } else {
                    Opcode::PulseTmsTdiTdo as u8
                };
                bytes[1] = u8::from(tms) | u8::from(tdi) << 1;
                2
            }
            Command::ShiftTdiTdo { num_bits } => {
                bytes[0] = Opcode::ShiftTdiTdo as u8;
                bytes[1..5].copy_from_slice(&num_bits.to_le_bytes());
                5
            }
            Command::ShiftTdo { num_bits } => {
                bytes[0] = Opcode::ShiftTdo as u8;
                bytes[1..5].copy_from_slice(&num_bits.to_le_bytes());
                5
            }
            Command::ShiftTdi { num_bits } => {
                bytes[0] = Opcode::ShiftTdi as u8;
                bytes[1..5].copy_from_slice(&num_bits.to_le_bytes());
                5
            }
            Command::RunTest { num_pulses } => {
                bytes[0] = Opcode::RunTest as u8;
                bytes[1..5].copy_from_slice(&num_pulses.to_le_bytes());
                5
            }
            Command::NullTdi { num_bits } => {
                bytes[0] = Opcode::NullTdi as u8;
                bytes[1..5].copy_from_slice(&num_bits.to_le_bytes());
                5
            }
            Command::SetProg { level } => {
                bytes[0] = Opcode::SetProg as u8;
                bytes[1] = u8::from(level);
                2
            }
            Command::SingleTestVector { vector, mask } => {
                bytes[0] = Opcode::SingleTestVector as u8;
                bytes[1] = vector;
                bytes[2] = mask;
                3
            }
            Command::GetTestVector => {
                bytes[0] = Opcode::GetTestVector as u8;
                1
            }
            Command::SetOscFrequency { divisor, external } => {
                bytes[0] = Opcode::SetOscFrequency as u8;
                bytes[1..3].copy_from_slice(&divisor.to_le_bytes());
                bytes[3] = u8::from(external);
                4
            }
            Command::EnableReturn => {
                bytes[0] = Opcode::EnableReturn as u8;
                1
            }
            Command::DisableReturn => {
                bytes[0] = Opcode::DisableReturn as u8;
                1
            }
            Command::TapSequence { num_bits, flags } => {
                bytes[0] = Opcode::TapSequence as u8;
                bytes[1..5].copy_from_slice(&num_bits.to_le_bytes());
                bytes[5] = flags.to_byte();
                TAP_SEQ_HDR_LEN
            }
            Command::Reset => {
                bytes[0] = Opcode::Reset as u8;
                1
            }
            Command::Unknown(code) => {
                bytes[0] = code;
                1
            }
        };
        frame.set_len(len);
    }
}
