//! In-process test doubles: a scripted packet link and loopback hardware.

use std::collections::VecDeque;
use std::io;

use xsusb_protocol::Frame;

use crate::flow::FrameLink;
use crate::{Board, InverterSense, Port, TapPort};

/// A packet link fed from a queue of pre-scripted inbound packets; sent
/// packets are recorded for inspection.
#[derive(Default)]
pub struct ScriptLink {
    inbound: VecDeque<Frame>,
    sent: Vec<Frame>,
    busy_sends: u32,
    busy_polls: u32,
}

impl ScriptLink {
    pub fn push_inbound(&mut self, payload: &[u8]) {
        self.inbound
            .push_back(Frame::from_payload(payload).expect("test payload fits a packet"));
    }

    pub fn sent(&self) -> &[Frame] {
        &self.sent
    }

    /// Makes the next `n` busy polls report an in-flight transmit.
    pub fn set_busy_sends(&mut self, n: u32) {
        self.busy_sends = n;
    }

    pub fn busy_polls(&self) -> u32 {
        self.busy_polls
    }
}

impl FrameLink for ScriptLink {
    fn poll_recv(&mut self, frame: &mut Frame) -> io::Result<bool> {
        match self.inbound.pop_front() {
            Some(next) => {
                *frame = next;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn wait_recv(&mut self, frame: &mut Frame) -> io::Result<()> {
        match self.inbound.pop_front() {
            Some(next) => {
                *frame = next;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "scripted link has no more packets",
            )),
        }
    }

    fn start_send(&mut self, frame: &Frame) -> io::Result<()> {
        self.sent.push(frame.clone());
        Ok(())
    }

    fn send_busy(&mut self) -> io::Result<bool> {
        if self.busy_sends > 0 {
            self.busy_sends -= 1;
            self.busy_polls += 1;
            return Ok(true);
        }
        Ok(false)
    }
}

/// A TAP port whose TDO line is wired straight to TDI, recording every TCK
/// pulse and the TMS level it was clocked with.
#[derive(Default)]
pub struct LoopTap {
    pub tms: bool,
    pub tdi: bool,
    pub pulses: u64,
    pub tms_trace: Vec<bool>,
    pub assist: bool,
    pub assist_shifts: u32,
}

impl LoopTap {
    pub fn assisted() -> LoopTap {
        LoopTap {
            assist: true,
            ..LoopTap::default()
        }
    }
}

impl TapPort for LoopTap {
    fn set_tms(&mut self, level: bool) {
        self.tms = level;
    }

    fn set_tdi(&mut self, level: bool) {
        self.tdi = level;
    }

    fn pulse_tck(&mut self) {
        self.pulses += 1;
        self.tms_trace.push(self.tms);
    }

    fn read_tdo(&mut self) -> bool {
        self.tdi
    }

    fn has_shift_assist(&self) -> bool {
        self.assist
    }

    fn shift_byte(&mut self, out: u8) -> u8 {
        self.assist_shifts += 1;
        let mut captured = 0u8;
        for bit in (0..8).rev() {
            self.tdi = out & (1 << bit) != 0;
            if self.tdi {
                captured |= 1 << bit;
            }
            self.pulses += 1;
            self.tms_trace.push(self.tms);
        }
        captured
    }
}

/// A board with a loopback primary port and optional loopback secondary.
#[derive(Default)]
pub struct SimBoard {
    pub tap: LoopTap,
    pub secondary: Option<LoopTap>,
    pub prog: bool,
    pub vector_out: u8,
    pub vector_sense: Option<u8>,
    pub osc: Option<(u16, bool)>,
    pub osc_ok: bool,
    pub inverters: Option<InverterSense>,
    pub resets: u32,
}

impl SimBoard {
    pub fn new() -> SimBoard {
        SimBoard {
            osc_ok: true,
            ..SimBoard::default()
        }
    }

    pub fn dual() -> SimBoard {
        SimBoard {
            secondary: Some(LoopTap::default()),
            ..SimBoard::new()
        }
    }
}

impl Board for SimBoard {
    fn tap(&mut self, port: Port) -> &mut dyn TapPort {
        match port {
            Port::Primary => &mut self.tap,
            Port::Secondary => self
                .secondary
                .as_mut()
                .expect("secondary port requested on a single-port board"),
        }
    }

    fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    fn reset(&mut self) {
        self.resets += 1;
        self.prog = true;
    }

    fn set_prog(&mut self, level: bool) {
        self.prog = level;
    }

    fn test_vector(&mut self) -> u8 {
        self.vector_out
    }

    fn set_test_vector(&mut self, vector: u8) {
        self.vector_out = vector;
    }

    fn sense_test_vector(&mut self) -> u8 {
        self.vector_sense.unwrap_or(self.vector_out)
    }

    fn set_osc_frequency(&mut self, divisor: u16, external: bool) -> bool {
        self.osc = Some((divisor, external));
        self.osc_ok
    }

    fn sense_inverters(&mut self) -> Option<InverterSense> {
        self.inverters
    }
}
