//! # XSUSB Client
//!
//! A client library for connecting to an XSUSB bridge and driving the JTAG
//! TAP of the FPGA or CPLD behind it.
//!
//! ## Overview
//!
//! The client speaks the XSUSB packet protocol over a framed TCP
//! connection: every packet is a length byte followed by up to 64 payload
//! bytes. One method is provided per command, and bulk bit-stream commands
//! chunk their payload across packets the same way the bridge does.
//!
//! ## Basic Usage
//!
//! ### Connecting and identifying the board
//!
//! ```ignore
//! use xsusb_client::XsusbClient;
//!
//! let mut client = XsusbClient::new("127.0.0.1:6671")?;
//! let info = client.info()?;
//! println!("product {:#06x}, version {:#06x}", info.product_id, info.version_id);
//! ```
//!
//! ### Shifting bits through the TAP
//!
//! ```ignore
//! // Shift 16 TDI bits and read the 16 TDO bits that come back.
//! let tdo = client.shift_tdi_tdo(16, &[0xA5, 0x3C])?;
//!
//! // The general TAP sequence gives per-command control of each line.
//! use xsusb_client::TapLine;
//! let tdo = client.tap_sequence(16, TapLine::Static(false), TapLine::Stream(&[0xA5, 0x3C]), true)?;
//! ```
//!
//! ## Related Crates
//!
//! - `xsusb-protocol` — packet encoding/decoding
//! - `xsusb-bridge` — the service this client talks to

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use xsusb_protocol::{
    Command, DeviceInfo, FRAME_PAYLOAD, Frame, Opcode, SeqFlags, TAP_SEQ_HDR_LEN,
};

/// Where a TAP line takes its value from during a sequence.
#[derive(Copy, Clone, Debug)]
pub enum TapLine<'a> {
    /// One bit per TCK cycle, LSB-first within each byte.
    Stream(&'a [u8]),
    /// A fixed level for the whole sequence.
    Static(bool),
}

/// XSUSB client for remote JTAG operations.
pub struct XsusbClient {
    tcp: TcpStream,
}

impl XsusbClient {
    pub fn new(addr: impl ToSocketAddrs) -> io::Result<XsusbClient> {
        let tcp = TcpStream::connect(addr)?;
        tcp.set_nodelay(true)?;
        Ok(XsusbClient { tcp })
    }

    fn send_frame(&mut self, frame: &Frame) -> io::Result<()> {
        self.tcp.write_all(&[frame.len() as u8])?;
        self.tcp.write_all(frame.payload())
    }

    fn recv_frame(&mut self) -> io::Result<Frame> {
        let mut length = [0u8; 1];
        self.tcp.read_exact(&mut length)?;
        let len = length[0] as usize;
        if len > FRAME_PAYLOAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame length {len} exceeds packet size"),
            ));
        }
        let mut frame = Frame::empty();
        self.tcp.read_exact(&mut frame.bytes_mut()[..len])?;
        frame.set_len(len);
        Ok(frame)
    }

    fn send_command(&mut self, command: Command) -> io::Result<()> {
        let mut frame = Frame::empty();
        command.encode(&mut frame);
        self.send_frame(&frame)
    }

    fn expect_echo(&mut self, opcode: Opcode, len: usize) -> io::Result<Frame> {
        let frame = self.recv_frame()?;
        if frame.opcode() != Some(opcode as u8) || frame.len() < len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected response to command {:#04x}", opcode as u8),
            ));
        }
        Ok(frame)
    }

    /// Blinks the board LED so it can be picked out on a bench.
    pub fn identify(&mut self) -> io::Result<()> {
        self.send_command(Command::Identify)?;
        self.expect_echo(Opcode::Identify, 1)?;
        Ok(())
    }

    /// Queries the device-info record.
    pub fn info(&mut self) -> io::Result<DeviceInfo> {
        self.send_command(Command::Info)?;
        let frame = self.expect_echo(Opcode::Info, FRAME_PAYLOAD)?;
        DeviceInfo::decode(&frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Runs the secondary-port inverter calibration on the bridge.
    pub fn sense_inverters(&mut self) -> io::Result<()> {
        self.send_command(Command::SenseInverters)?;
        self.expect_echo(Opcode::SenseInverters, 1)?;
        Ok(())
    }

    /// Drives TMS and TDI and pulses TCK once.
    pub fn pulse(&mut self, tms: bool, tdi: bool) -> io::Result<()> {
        self.send_command(Command::PulseTmsTdi { tms, tdi })
    }

    /// Drives TMS and TDI, pulses TCK once, and returns the TDO level the
    /// bridge sampled before the pulse.
    pub fn pulse_with_tdo(&mut self, tms: bool, tdi: bool) -> io::Result<bool> {
        self.send_command(Command::PulseTmsTdiTdo { tms, tdi })?;
        let frame = self.expect_echo(Opcode::PulseTmsTdiTdo, 2)?;
        Ok(frame.payload()[1] & 0x04 != 0)
    }

    /// Shifts `num_bits` TDI bits into the TAP and returns the TDO bits that
    /// came back. `tdi` must hold ⌈num_bits / 8⌉ bytes.
    pub fn shift_tdi_tdo(&mut self, num_bits: u32, tdi: &[u8]) -> io::Result<Vec<u8>> {
        self.check_stream_len(num_bits, tdi)?;
        self.send_command(Command::ShiftTdiTdo { num_bits })?;
        self.send_stream(tdi)?;
        self.recv_stream(stream_bytes(num_bits))
    }

    /// Reads `num_bits` TDO bits; TDI is held low for the whole stream.
    pub fn shift_tdo(&mut self, num_bits: u32) -> io::Result<Vec<u8>> {
        self.send_command(Command::ShiftTdo { num_bits })?;
        self.recv_stream(stream_bytes(num_bits))
    }

    /// Shifts `num_bits` TDI bits into the TAP, collecting nothing.
    pub fn shift_tdi(&mut self, num_bits: u32, tdi: &[u8]) -> io::Result<()> {
        self.check_stream_len(num_bits, tdi)?;
        self.send_command(Command::ShiftTdi { num_bits })?;
        self.send_stream(tdi)
    }

    /// Pulses TCK `num_pulses` times (or waits out the equivalent delay for
    /// large counts).
    pub fn run_test(&mut self, num_pulses: u32) -> io::Result<()> {
        self.send_command(Command::RunTest { num_pulses })?;
        let frame = self.expect_echo(Opcode::RunTest, 5)?;
        let echoed = u32::from_le_bytes(frame.payload()[1..5].try_into().unwrap_or_default());
        if echoed != num_pulses {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "run-test acknowledgement does not echo the pulse count",
            ));
        }
        Ok(())
    }

    /// Feeds `num_bits` worth of discarded filler to resynchronize stream
    /// framing after an aborted transfer.
    pub fn null_tdi(&mut self, num_bits: u32) -> io::Result<()> {
        self.send_command(Command::NullTdi { num_bits })?;
        let filler = vec![0u8; stream_bytes(num_bits)];
        self.send_stream(&filler)
    }

    /// Sets the FPGA PROG# pin level.
    pub fn set_prog(&mut self, level: bool) -> io::Result<()> {
        self.send_command(Command::SetProg { level })
    }

    /// Drives `vector` through `mask` onto the test port. Returns the driven
    /// and sensed vector bytes.
    pub fn single_test_vector(&mut self, vector: u8, mask: u8) -> io::Result<(u8, u8)> {
        self.send_command(Command::SingleTestVector { vector, mask })?;
        let frame = self.expect_echo(Opcode::SingleTestVector, 3)?;
        Ok((frame.payload()[1], frame.payload()[2]))
    }

    /// Reads back the driven and sensed test vector bytes.
    pub fn get_test_vector(&mut self) -> io::Result<(u8, u8)> {
        self.send_command(Command::GetTestVector)?;
        let frame = self.expect_echo(Opcode::GetTestVector, 3)?;
        Ok((frame.payload()[1], frame.payload()[2]))
    }

    /// Programs the board oscillator divisor. Returns true when the bridge
    /// accepted it.
    pub fn set_osc_frequency(&mut self, divisor: u16, external: bool) -> io::Result<bool> {
        self.send_command(Command::SetOscFrequency { divisor, external })?;
        let frame = self.expect_echo(Opcode::SetOscFrequency, 5)?;
        Ok(frame.payload()[4] == 0)
    }

    /// Re-enables default responses on the bridge's secondary channel.
    pub fn enable_return(&mut self) -> io::Result<()> {
        self.send_command(Command::EnableReturn)
    }

    /// Suppresses default responses on the bridge's secondary channel.
    pub fn disable_return(&mut self) -> io::Result<()> {
        self.send_command(Command::DisableReturn)
    }

    /// Runs a general TAP sequence of `num_bits` cycles. Returns the
    /// collected TDO bytes when `collect_tdo` is set.
    pub fn tap_sequence(
        &mut self,
        num_bits: u32,
        tms: TapLine<'_>,
        tdi: TapLine<'_>,
        collect_tdo: bool,
    ) -> io::Result<Option<Vec<u8>>> {
        let num_bytes = stream_bytes(num_bits);
        if let TapLine::Stream(bits) = tms {
            if bits.len() != num_bytes {
                return Err(io::Error::other("TMS has incorrect size"));
            }
        }
        if let TapLine::Stream(bits) = tdi {
            if bits.len() != num_bytes {
                return Err(io::Error::other("TDI has incorrect size"));
            }
        }

        let payload = match (tms, tdi) {
            (TapLine::Stream(tms), TapLine::Stream(tdi)) => interleave(tms, tdi),
            (TapLine::Stream(tms), TapLine::Static(_)) => tms.to_vec(),
            (TapLine::Static(_), TapLine::Stream(tdi)) => tdi.to_vec(),
            (TapLine::Static(_), TapLine::Static(_)) => Vec::new(),
        };
        // The bridge accounts the stream in packet-sized chunks whether or
        // not payload bytes are actually present, so a payload-free first
        // packet is padded out to the size the accounting expects.
        let accounted = match payload.len() {
            0 => num_bytes,
            len => len,
        };

        let flags = SeqFlags {
            collect_tdo,
            tms_in_stream: matches!(tms, TapLine::Stream(_)),
            static_tms: matches!(tms, TapLine::Static(true)),
            tdi_in_stream: matches!(tdi, TapLine::Stream(_)),
            static_tdi: matches!(tdi, TapLine::Static(true)),
            multi_packet: accounted + TAP_SEQ_HDR_LEN > FRAME_PAYLOAD,
        };

        let mut frame = Frame::empty();
        Command::TapSequence { num_bits, flags }.encode(&mut frame);
        let first_chunk = payload.len().min(FRAME_PAYLOAD - TAP_SEQ_HDR_LEN);
        frame
            .extend_from_slice(&payload[..first_chunk])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        if payload.is_empty() {
            let padding = (accounted + TAP_SEQ_HDR_LEN).min(FRAME_PAYLOAD);
            frame.set_len(padding);
        }
        self.send_frame(&frame)?;
        if first_chunk < payload.len() {
            self.send_stream(&payload[first_chunk..])?;
        }

        if !collect_tdo {
            return Ok(None);
        }
        self.recv_stream(num_bytes).map(Some)
    }

    /// Requests a full device reset. The bridge ends the session.
    pub fn reset(&mut self) -> io::Result<()> {
        self.send_command(Command::Reset)
    }

    fn check_stream_len(&self, num_bits: u32, tdi: &[u8]) -> io::Result<()> {
        if tdi.len() != stream_bytes(num_bits) {
            return Err(io::Error::other("TDI has incorrect size"));
        }
        Ok(())
    }

    fn send_stream(&mut self, mut payload: &[u8]) -> io::Result<()> {
        while !payload.is_empty() {
            let chunk = payload.len().min(FRAME_PAYLOAD);
            let frame = Frame::from_payload(&payload[..chunk])
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            self.send_frame(&frame)?;
            payload = &payload[chunk..];
        }
        Ok(())
    }

    fn recv_stream(&mut self, num_bytes: usize) -> io::Result<Vec<u8>> {
        let mut collected = Vec::with_capacity(num_bytes);
        while collected.len() < num_bytes {
            let frame = self.recv_frame()?;
            if frame.is_empty() {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            collected.extend_from_slice(frame.payload());
        }
        if collected.len() != num_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "stream response longer than the declared bit count",
            ));
        }
        Ok(collected)
    }
}

fn stream_bytes(num_bits: u32) -> usize {
    u64::from(num_bits).div_ceil(8) as usize
}

/// TMS byte then TDI byte for each 8 bits of the sequence.
fn interleave(tms: &[u8], tdi: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(tms.len() * 2);
    for (tms_byte, tdi_byte) in tms.iter().zip(tdi) {
        out.push(*tms_byte);
        out.push(*tdi_byte);
    }
    out
}
