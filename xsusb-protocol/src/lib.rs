//! # XSUSB Protocol Library
//!
//! This crate implements the XSUSB command packet format, the wire protocol
//! spoken between a host PC and a USB-to-JTAG bridge that drives the TAP
//! (Test Access Port) of an FPGA or CPLD.
//!
//! ## Overview
//!
//! XSUSB is a packet protocol: every exchange is a fixed-size packet of at
//! most [`FRAME_PAYLOAD`] bytes whose first byte selects a command. The
//! remaining bytes are a command-specific layout, and bulk bit-stream
//! commands extend over many packets. This library implements the packet
//! layer, allowing you to:
//!
//! - Parse and encode command packets ([`Command`], [`Frame`])
//! - Build and verify the device-info record ([`DeviceInfo`])
//! - Reconcile wire bit order with shift-register bit order ([`bits::reverse`])
//!
//! ## Command Set
//!
//! - `0x31..0x32` — board identification and LED control
//! - `0x40..0x43` — device info, inverter sensing, single TAP pulses
//! - `0x44..0x48` — bulk TDI/TDO bit streams and stream resynchronization
//! - `0x49..0x4E` — program pin, test vectors, oscillator, response gating
//! - `0x4F` — the general TAP sequence (TMS/TDI out, TDO back, flag driven)
//! - `0xFF` — device reset
//!
//! ## Basic Usage
//!
//! ### Parsing a received packet
//!
//! ```
//! use xsusb_protocol::{Command, Frame};
//!
//! let mut frame = Frame::empty();
//! frame.extend_from_slice(&[0x47, 0x10, 0x27, 0x00, 0x00]).unwrap();
//!
//! match Command::parse(&frame).unwrap() {
//!     Command::RunTest { num_pulses } => assert_eq!(num_pulses, 10_000),
//!     other => panic!("expected RunTest, got {:?}", other),
//! }
//! ```
//!
//! ### Encoding a command
//!
//! ```
//! use xsusb_protocol::{Command, Frame};
//!
//! let mut frame = Frame::empty();
//! Command::ShiftTdi { num_bits: 16 }.encode(&mut frame);
//! assert_eq!(frame.payload(), &[0x46, 0x10, 0x00, 0x00, 0x00]);
//! ```
//!
//! ## Bit Order
//!
//! Stream payload bytes carry bits LSB-first on the wire: bit 0 of a payload
//! byte is the first bit shifted into the TAP. Hardware shift registers
//! transmit MSB-first, so implementations using one reconcile the two orders
//! with the [`bits::reverse`] table.
//!
//! ## Framing
//!
//! Packets are at most [`FRAME_PAYLOAD`] bytes and may be shorter; packet
//! boundaries are significant. On byte-stream transports each packet is
//! prefixed with a single length byte. With the `tokio` feature enabled the
//! `codec` module provides a `tokio_util` codec implementation of this
//! framing.
//!
//! ## Error Handling
//!
//! Packet-level problems are reported as [`error::ParseError`]. Unrecognized
//! command codes are not an error: they parse to [`Command::Unknown`] so the
//! device side can ignore them, which is the documented behavior.

pub mod bits;
#[cfg(feature = "tokio")]
pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod info;

pub use command::{Command, Opcode, SeqFlags, TAP_SEQ_HDR_LEN};
pub use frame::{FRAME_PAYLOAD, Frame};
pub use info::DeviceInfo;
