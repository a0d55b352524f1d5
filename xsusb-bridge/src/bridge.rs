//! The command dispatcher.
//!
//! One packet at a time: poll a channel, decode the command byte, execute,
//! emit the response the command defines. Bulk stream commands hand off to
//! the engine, which pulls and pushes further packets itself; everything
//! else answers through the default response path, which the host can gate
//! per channel to cut acknowledgement traffic during long scan sequences.

use std::io;
use std::thread;
use std::time::Duration;

use xsusb_protocol::{Command, DeviceInfo, FRAME_PAYLOAD, Opcode};

use crate::engine::{self, StreamSpec};
use crate::flow::{FrameLink, PacketIo};
use crate::timer::{NUM_ACTIVITY_BLINKS, SUSTAINED_BLINK, TickHandle};
use crate::{Board, InverterSense, Port};

/// Run-test counts up to this many pulses are clocked synchronously; larger
/// counts wait on the tick countdown instead, so the busy loop stays
/// bounded.
pub const RUN_TEST_THRESHOLD: u32 = 5461;

/// Blink charge for the identify command.
const IDENTIFY_BLINKS: u8 = 50;

/// Accepted oscillator divisor range.
const OSC_DIVISOR_MIN: u16 = 1;
const OSC_DIVISOR_MAX: u16 = 2052;

/// Dispatcher tuning.
#[derive(Clone, Debug)]
pub struct Config {
    /// Record returned by the info command.
    pub device_info: DeviceInfo,
    /// Pulse count above which run-test switches to the tick countdown.
    pub run_test_threshold: u32,
    /// Sleep between polls when servicing more than one channel.
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            device_info: DeviceInfo::default(),
            run_test_threshold: RUN_TEST_THRESHOLD,
            poll_interval: Duration::from_micros(500),
        }
    }
}

/// Outcome of one service step.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Control {
    /// No packet was waiting.
    Idle,
    /// A packet was serviced.
    Handled,
    /// The host requested a device reset.
    Reset,
}

/// Why a service session ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionEnd {
    Disconnected,
    ResetRequested,
}

struct Channel<L> {
    port: Port,
    io: PacketIo<L>,
    return_enabled: bool,
    calibration: Option<InverterSense>,
}

impl<L: FrameLink> Channel<L> {
    fn new(port: Port, link: L) -> Channel<L> {
        Channel {
            port,
            io: PacketIo::new(link),
            return_enabled: true,
            calibration: None,
        }
    }
}

/// The bridge service: a board plus one packet channel per JTAG port.
pub struct Bridge<B: Board, L: FrameLink> {
    board: B,
    channels: Vec<Channel<L>>,
    ticker: TickHandle,
    config: Config,
}

impl<B: Board, L: FrameLink> Bridge<B, L> {
    pub fn new(mut board: B, primary: L, ticker: TickHandle, config: Config) -> Bridge<B, L> {
        board.reset();
        Bridge {
            board,
            channels: vec![Channel::new(Port::Primary, primary)],
            ticker,
            config,
        }
    }

    /// Binds a second channel to the secondary JTAG port.
    pub fn attach_secondary(&mut self, link: L) {
        self.channels.push(Channel::new(Port::Secondary, link));
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn into_board(self) -> B {
        self.board
    }

    /// The inverter calibration recorded for a port, if any was sensed this
    /// session.
    pub fn calibration(&self, port: Port) -> Option<InverterSense> {
        self.channels
            .iter()
            .find(|c| c.port == port)
            .and_then(|c| c.calibration)
    }

    /// Polls every channel once and services whatever arrived.
    pub fn service(&mut self) -> io::Result<Control> {
        let mut outcome = Control::Idle;
        for idx in 0..self.channels.len() {
            if self.channels[idx].io.try_receive()? {
                if let Control::Reset = self.handle_packet(idx)? {
                    return Ok(Control::Reset);
                }
                outcome = Control::Handled;
            }
        }
        Ok(outcome)
    }

    /// Services packets until the host disconnects or requests a reset.
    pub fn run(&mut self) -> io::Result<SessionEnd> {
        loop {
            let outcome = if self.channels.len() == 1 {
                match self.channels[0].io.receive() {
                    Ok(()) => self.handle_packet(0),
                    Err(e) => Err(e),
                }
            } else {
                self.service()
            };
            match outcome {
                Ok(Control::Reset) => return Ok(SessionEnd::ResetRequested),
                Ok(Control::Idle) => thread::sleep(self.config.poll_interval),
                Ok(Control::Handled) => {}
                Err(e) if is_disconnect(&e) => return Ok(SessionEnd::Disconnected),
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_packet(&mut self, idx: usize) -> io::Result<Control> {
        let port = self.channels[idx].port;
        let command = match Command::parse(self.channels[idx].io.recv_frame()) {
            Ok(command) => command,
            Err(e) => {
                log::warn!("Dropping malformed packet on {:?} channel: {}", port, e);
                return Ok(Control::Handled);
            }
        };
        log::debug!("Received {:?} on {:?} channel", command, port);
        self.ticker.set_blink(NUM_ACTIVITY_BLINKS);

        // Byte count the default return path sends from the compose buffer;
        // stream commands answer through the engine instead.
        let mut num_return = 0usize;

        match command {
            Command::Identify => {
                self.ticker.set_blink(IDENTIFY_BLINKS);
                self.channels[idx].io.send_frame().bytes_mut()[0] = Opcode::Identify as u8;
                num_return = 1;
            }
            Command::UpdateLed | Command::Unknown(_) => {}
            Command::Info => {
                self.config
                    .device_info
                    .encode(Opcode::Info as u8, self.channels[idx].io.send_frame());
                num_return = FRAME_PAYLOAD;
            }
            Command::SenseInverters => {
                let sense = self.board.sense_inverters();
                match sense {
                    Some(cal) => log::info!(
                        "Secondary port calibration: tck_inverted={}, tdo_inverted={}",
                        cal.tck_inverted,
                        cal.tdo_inverted
                    ),
                    None => log::warn!("No device answered on the secondary port"),
                }
                if let Some(channel) = self
                    .channels
                    .iter_mut()
                    .find(|c| c.port == Port::Secondary)
                {
                    channel.calibration = sense;
                }
                self.channels[idx].io.send_frame().bytes_mut()[0] = Opcode::SenseInverters as u8;
                num_return = 1;
            }
            Command::PulseTmsTdi { tms, tdi } => {
                let tap = self.board.tap(port);
                tap.set_tms(tms);
                tap.set_tdi(tdi);
                tap.pulse_tck();
            }
            Command::PulseTmsTdiTdo { tms, tdi } => {
                let tap = self.board.tap(port);
                let tdo = tap.read_tdo();
                tap.set_tms(tms);
                tap.set_tdi(tdi);
                tap.pulse_tck();
                let response = self.channels[idx].io.send_frame().bytes_mut();
                response[0] = Opcode::PulseTmsTdiTdo as u8;
                response[1] = u8::from(tms) | u8::from(tdi) << 1 | u8::from(tdo) << 2;
                num_return = 2;
            }
            Command::ShiftTdiTdo { num_bits }
            | Command::ShiftTdo { num_bits }
            | Command::ShiftTdi { num_bits } => {
                if num_bits == 0 {
                    // Nothing follows a zero-length request; likely a host
                    // error, but not ours to fault.
                    log::debug!("Ignoring zero-length bulk stream request");
                } else {
                    let spec = match command {
                        Command::ShiftTdiTdo { .. } => StreamSpec::bulk_tdi_tdo(num_bits),
                        Command::ShiftTdo { .. } => StreamSpec::bulk_tdo(num_bits),
                        _ => StreamSpec::bulk_tdi(num_bits),
                    };
                    self.ticker.set_blink(SUSTAINED_BLINK);
                    let channel = &mut self.channels[idx];
                    let tap = self.board.tap(port);
                    engine::run_bulk(tap, &mut channel.io, &spec)?;
                    self.ticker.finish_activity();
                }
            }
            Command::TapSequence { num_bits, flags } => {
                if num_bits == 0 {
                    log::debug!("Ignoring zero-length TAP sequence request");
                } else {
                    let spec = StreamSpec::from_seq_flags(num_bits, &flags);
                    self.ticker.set_blink(SUSTAINED_BLINK);
                    let channel = &mut self.channels[idx];
                    let tap = self.board.tap(port);
                    engine::run_tap_seq(tap, &mut channel.io, &spec)?;
                    self.ticker.finish_activity();
                }
            }
            Command::RunTest { num_pulses } => {
                if num_pulses > self.config.run_test_threshold {
                    let ticks = 1 + num_pulses / self.config.run_test_threshold;
                    log::debug!("Run-test: waiting {} ticks for {} pulses", ticks, num_pulses);
                    self.ticker.start_countdown(ticks);
                    self.ticker.wait_countdown();
                } else {
                    let tap = self.board.tap(port);
                    for _ in 0..num_pulses {
                        tap.pulse_tck();
                    }
                }
                let (request, response) = self.channels[idx].io.frames();
                response.bytes_mut()[..5].copy_from_slice(&request.payload()[..5]);
                num_return = 5;
            }
            Command::NullTdi { num_bits } => {
                if num_bits == 0 {
                    log::debug!("Ignoring zero-length discard request");
                } else {
                    engine::discard_stream(&mut self.channels[idx].io, num_bits)?;
                }
            }
            Command::SetProg { level } => {
                self.board.set_prog(level);
            }
            Command::SingleTestVector { vector, mask } => {
                let current = self.board.test_vector();
                let driven = (current & !mask) | (vector & mask);
                self.board.set_test_vector(driven);
                let sensed = self.board.sense_test_vector();
                let response = self.channels[idx].io.send_frame().bytes_mut();
                response[0] = Opcode::SingleTestVector as u8;
                response[1] = driven;
                response[2] = sensed;
                num_return = 3;
            }
            Command::GetTestVector => {
                let driven = self.board.test_vector();
                let sensed = self.board.sense_test_vector();
                let response = self.channels[idx].io.send_frame().bytes_mut();
                response[0] = Opcode::GetTestVector as u8;
                response[1] = driven;
                response[2] = sensed;
                num_return = 3;
            }
            Command::SetOscFrequency { divisor, external } => {
                let in_range = (OSC_DIVISOR_MIN..=OSC_DIVISOR_MAX).contains(&divisor);
                let accepted = in_range && self.board.set_osc_frequency(divisor, external);
                if !in_range {
                    log::warn!("Oscillator divisor {} out of range", divisor);
                }
                let response = self.channels[idx].io.send_frame().bytes_mut();
                response[0] = Opcode::SetOscFrequency as u8;
                response[1..3].copy_from_slice(&divisor.to_le_bytes());
                response[3] = u8::from(external);
                response[4] = u8::from(!accepted);
                num_return = 5;
            }
            Command::EnableReturn | Command::DisableReturn => {
                let enable = matches!(command, Command::EnableReturn);
                let channel = &mut self.channels[idx];
                if channel.port == Port::Secondary {
                    channel.return_enabled = enable;
                } else {
                    // Response gating is only wired to the secondary channel.
                    log::debug!("Return gating ignored on the primary channel");
                }
            }
            Command::Reset => {
                log::info!("Reset requested by host");
                return Ok(Control::Reset);
            }
        }

        let channel = &mut self.channels[idx];
        if num_return > 0 && channel.return_enabled {
            channel.io.send(num_return)?;
        }
        Ok(Control::Handled)
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}
