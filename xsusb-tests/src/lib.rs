//! Simulated hardware and server scaffolding for bridge integration tests.

use std::collections::VecDeque;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use xsusb_bridge::{Board, Builder, Port, TapPort};

/// Externally observable board state, shared with the server thread.
#[derive(Default)]
pub struct ProbeState {
    pub prog: bool,
    pub pulses: u64,
    pub resets: u32,
    pub osc: Option<(u16, bool)>,
}

/// Handle for probing a simulated board from the test while the server owns
/// it.
#[derive(Clone, Default)]
pub struct BoardProbe {
    inner: Arc<Mutex<ProbeState>>,
}

impl BoardProbe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.inner.lock().unwrap()
    }

    pub fn prog(&self) -> bool {
        self.lock().prog
    }

    pub fn pulses(&self) -> u64 {
        self.lock().pulses
    }

    pub fn resets(&self) -> u32 {
        self.lock().resets
    }

    pub fn osc(&self) -> Option<(u16, bool)> {
        self.lock().osc
    }
}

/// A TAP whose TDO pin is wired straight to its TDI pin.
pub struct WireLoopbackTap {
    tdi: bool,
    probe: BoardProbe,
}

impl TapPort for WireLoopbackTap {
    fn set_tms(&mut self, _level: bool) {}

    fn set_tdi(&mut self, level: bool) {
        self.tdi = level;
    }

    fn pulse_tck(&mut self) {
        self.probe.lock().pulses += 1;
    }

    fn read_tdo(&mut self) -> bool {
        self.tdi
    }
}

/// A TAP looped back through a fixed-length shift register: every TCK pulse
/// shifts the TDI level in at one end and the oldest bit out of the TDO end.
pub struct ShiftRegisterTap {
    register: VecDeque<bool>,
    tdi: bool,
    probe: BoardProbe,
}

impl ShiftRegisterTap {
    fn new(length: usize, probe: BoardProbe) -> ShiftRegisterTap {
        ShiftRegisterTap {
            register: VecDeque::from(vec![false; length]),
            tdi: false,
            probe,
        }
    }
}

impl TapPort for ShiftRegisterTap {
    fn set_tms(&mut self, _level: bool) {}

    fn set_tdi(&mut self, level: bool) {
        self.tdi = level;
    }

    fn pulse_tck(&mut self) {
        self.register.push_back(self.tdi);
        self.register.pop_front();
        self.probe.lock().pulses += 1;
    }

    fn read_tdo(&mut self) -> bool {
        self.register.front().copied().unwrap_or(self.tdi)
    }
}

/// A single-port simulated board with a wire-looped test-vector port.
pub struct SimBoard<T: TapPort> {
    tap: T,
    vector_out: u8,
    probe: BoardProbe,
}

impl SimBoard<WireLoopbackTap> {
    pub fn wire() -> (SimBoard<WireLoopbackTap>, BoardProbe) {
        let probe = BoardProbe::default();
        let tap = WireLoopbackTap {
            tdi: false,
            probe: probe.clone(),
        };
        (
            SimBoard {
                tap,
                vector_out: 0,
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl SimBoard<ShiftRegisterTap> {
    pub fn shift_register(length: usize) -> (SimBoard<ShiftRegisterTap>, BoardProbe) {
        let probe = BoardProbe::default();
        let tap = ShiftRegisterTap::new(length, probe.clone());
        (
            SimBoard {
                tap,
                vector_out: 0,
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl<T: TapPort> Board for SimBoard<T> {
    fn tap(&mut self, _port: Port) -> &mut dyn TapPort {
        &mut self.tap
    }

    fn reset(&mut self) {
        let mut state = self.probe.lock();
        state.resets += 1;
        state.prog = true;
    }

    fn set_prog(&mut self, level: bool) {
        self.probe.lock().prog = level;
    }

    fn test_vector(&mut self) -> u8 {
        self.vector_out
    }

    fn set_test_vector(&mut self, vector: u8) {
        self.vector_out = vector;
    }

    fn sense_test_vector(&mut self) -> u8 {
        self.vector_out
    }

    fn set_osc_frequency(&mut self, divisor: u16, external: bool) -> bool {
        self.probe.lock().osc = Some((divisor, external));
        true
    }
}

/// Starts a bridge server around `board` on an ephemeral port and returns
/// its address. The server thread runs for the rest of the test process.
pub fn spawn_server<B: Board + Send + 'static>(board: B) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    thread::spawn(move || {
        let mut server = Builder::new().build(board).expect("start server");
        let _ = server.serve(listener);
    });
    addr
}
