//! # XSUSB Bridge Library
//!
//! This crate provides the core of an XSUSB bridge: a service that accepts
//! XSUSB command packets from a host and drives the JTAG TAP (Test Access
//! Port) of an FPGA or CPLD on the host's behalf.
//!
//! ## Architecture
//!
//! The crate is built around a small set of pieces:
//!
//! - **[`TapPort`] trait**: the pin-level interface a backend implements to
//!   drive TCK/TMS/TDI and sample TDO on one physical JTAG port, with an
//!   optional byte-wide shift-register fast path
//! - **[`Board`] trait**: everything else a board exposes beyond its TAP
//!   ports — the FPGA PROG# pin, a status LED, and optional collaborators
//!   such as a test-vector port, a programmable oscillator, and the
//!   inverter-sensing calibration of a secondary port
//! - **[`engine`]**: the bit-stream engine that shifts an arbitrary number
//!   of bits through a [`TapPort`], reassembling byte-aligned packets as it
//!   goes
//! - **[`flow`]**: packet flow control — ping-pong buffer pairs over a
//!   [`flow::FrameLink`] transport
//! - **[`bridge`]**: the command dispatcher servicing one packet at a time
//! - **[`net`]**: a framed TCP transport and a connection-accepting
//!   [`net::Server`] wrapping the dispatcher
//!
//! ## How It Works
//!
//! 1. A backend implements [`TapPort`] and [`Board`] for its hardware
//! 2. The board is wrapped in a [`net::Server`] (or a [`bridge::Bridge`]
//!    over a custom transport)
//! 3. The server accepts a host connection and services command packets to
//!    completion, one at a time, until the host disconnects or sends the
//!    reset command
//!
//! ## Concurrency Model
//!
//! The service loop is single-threaded and cooperative: one packet is
//! decoded, executed and answered before the next is read. Bulk bit-stream
//! commands own the loop for their whole duration and wait indefinitely for
//! their next payload chunk. The only background activity is the
//! [`timer::Ticker`], which drives the status LED cadence and the run-test
//! countdown; it touches nothing else.
//!
//! ## Error Handling
//!
//! Pin operations are unconditional and infallible at this interface;
//! backends that can fail internally log and fall back rather than
//! propagate. Transport I/O uses `io::Result` throughout. Malformed command
//! packets are logged and skipped — the protocol has no error channel back
//! to the host beyond the status bytes individual commands define.
//!
//! ## Logging
//!
//! This crate uses the `log` crate for diagnostics. Configure an
//! implementation such as `env_logger` to see connections, per-command
//! traces and stream payload dumps.

pub mod bridge;
pub mod engine;
pub mod flow;
pub mod net;
pub mod timer;

#[cfg(test)]
mod testutil;

pub use bridge::{Bridge, Config, Control, SessionEnd};
pub use net::{Builder, Server, TcpLink};

/// Which of a board's JTAG ports a channel is bound to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Port {
    /// The main JTAG port, normally wired to the FPGA.
    Primary,
    /// A second JTAG port behind possibly-inverting buffers, on boards that
    /// have one.
    Secondary,
}

/// Result of sensing the inverting buffers on a secondary port.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct InverterSense {
    pub tck_inverted: bool,
    pub tdo_inverted: bool,
}

/// Pin-level interface to one JTAG port.
///
/// These are unconditional hardware actions with no failure mode at this
/// surface; correctness is the caller's responsibility. A port that knows
/// its TCK or TDO line sits behind an inverting buffer applies that
/// correction internally, so callers always see logical levels.
pub trait TapPort {
    /// Drives the TMS line.
    fn set_tms(&mut self, level: bool);

    /// Drives the TDI line.
    fn set_tdi(&mut self, level: bool);

    /// Drives TCK through one full clock cycle (high, then low).
    fn pulse_tck(&mut self);

    /// Samples the TDO line.
    fn read_tdo(&mut self) -> bool;

    /// True when [`TapPort::shift_byte`] is backed by a hardware shift
    /// register rather than the manual fallback.
    fn has_shift_assist(&self) -> bool {
        false
    }

    /// Exchanges one byte with the TAP, transmitting MSB-first while
    /// capturing 8 TDO bits. TMS must stay constant for the whole byte; do
    /// not call this when TMS has to change mid-byte.
    fn shift_byte(&mut self, out: u8) -> u8 {
        let mut captured = 0u8;
        for bit in (0..8).rev() {
            self.set_tdi(out & (1 << bit) != 0);
            if self.read_tdo() {
                captured |= 1 << bit;
            }
            self.pulse_tck();
        }
        captured
    }
}

/// A status LED handle, handed off to the background ticker.
pub trait StatusLed: Send {
    fn set(&mut self, on: bool);
}

impl<F: FnMut(bool) + Send> StatusLed for F {
    fn set(&mut self, on: bool) {
        self(on)
    }
}

/// Everything a board exposes to the dispatcher.
///
/// Only the primary TAP port and the PROG# pin are mandatory; the remaining
/// operations have conservative defaults so simple single-port boards need
/// not wire them.
pub trait Board {
    /// The TAP port bound to `port`. Callers only pass [`Port::Secondary`]
    /// when [`Board::has_secondary`] is true.
    fn tap(&mut self, port: Port) -> &mut dyn TapPort;

    fn has_secondary(&self) -> bool {
        false
    }

    /// Returns the board to its power-on state: PROG# high, TAP lines idle.
    /// Called at session start and when the host requests a reset.
    fn reset(&mut self) {}

    /// Drives the FPGA PROG# pin.
    fn set_prog(&mut self, level: bool);

    /// The test vector currently driven onto the parallel test port.
    fn test_vector(&mut self) -> u8 {
        0
    }

    /// Drives the parallel test port.
    fn set_test_vector(&mut self, _vector: u8) {}

    /// Reads the sensed levels of the parallel test port.
    fn sense_test_vector(&mut self) -> u8 {
        0
    }

    /// Programs the board oscillator. Returns false when the board has no
    /// programmable oscillator or programming failed.
    fn set_osc_frequency(&mut self, _divisor: u16, _external: bool) -> bool {
        false
    }

    /// Runs the secondary-port inverter calibration. Returns `None` when no
    /// device answers on that port, leaving it in bit-banging fallback mode.
    fn sense_inverters(&mut self) -> Option<InverterSense> {
        None
    }

    /// Hands the status LED to the caller, once. Subsequent calls return
    /// `None`.
    fn take_led(&mut self) -> Option<Box<dyn StatusLed>> {
        None
    }
}

impl<B: Board + ?Sized> Board for &mut B {
    fn tap(&mut self, port: Port) -> &mut dyn TapPort {
        (**self).tap(port)
    }

    fn has_secondary(&self) -> bool {
        (**self).has_secondary()
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn set_prog(&mut self, level: bool) {
        (**self).set_prog(level)
    }

    fn test_vector(&mut self) -> u8 {
        (**self).test_vector()
    }

    fn set_test_vector(&mut self, vector: u8) {
        (**self).set_test_vector(vector)
    }

    fn sense_test_vector(&mut self) -> u8 {
        (**self).sense_test_vector()
    }

    fn set_osc_frequency(&mut self, divisor: u16, external: bool) -> bool {
        (**self).set_osc_frequency(divisor, external)
    }

    fn sense_inverters(&mut self) -> Option<InverterSense> {
        (**self).sense_inverters()
    }

    fn take_led(&mut self) -> Option<Box<dyn StatusLed>> {
        (**self).take_led()
    }
}
