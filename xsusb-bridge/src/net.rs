//! Framed TCP transport and the connection-accepting server.
//!
//! Each packet travels as one length byte followed by that many payload
//! bytes, preserving packet boundaries on the stream. The server accepts a
//! host connection, services it to completion with a [`Bridge`], and goes
//! back to accepting; a reset command ends the session the same way a
//! disconnect does, after re-initializing the board.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use xsusb_protocol::{DeviceInfo, FRAME_PAYLOAD, Frame};

use crate::Board;
use crate::bridge::{Bridge, Config, SessionEnd};
use crate::flow::FrameLink;
use crate::timer::Ticker;

/// A [`FrameLink`] over a TCP stream.
pub struct TcpLink {
    stream: TcpStream,
    nonblocking: bool,
    /// Declared length of the packet being assembled, once its length byte
    /// has arrived.
    pending_len: Option<usize>,
    filled: usize,
    scratch: [u8; FRAME_PAYLOAD],
}

impl TcpLink {
    pub fn new(stream: TcpStream) -> io::Result<TcpLink> {
        stream.set_nodelay(true)?;
        stream.set_nonblocking(false)?;
        Ok(TcpLink {
            stream,
            nonblocking: false,
            pending_len: None,
            filled: 0,
            scratch: [0; FRAME_PAYLOAD],
        })
    }

    fn set_mode(&mut self, nonblocking: bool) -> io::Result<()> {
        if self.nonblocking != nonblocking {
            self.stream.set_nonblocking(nonblocking)?;
            self.nonblocking = nonblocking;
        }
        Ok(())
    }

    /// Makes progress on the packet being assembled. Returns true once it is
    /// complete; false only in non-blocking mode when the socket runs dry.
    fn fill_step(&mut self) -> io::Result<bool> {
        loop {
            match self.pending_len {
                None => {
                    let mut length = [0u8; 1];
                    match self.stream.read(&mut length) {
                        Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                        Ok(_) => {
                            let len = length[0] as usize;
                            if len > FRAME_PAYLOAD {
                                return Err(io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    format!("frame length {len} exceeds packet size"),
                                ));
                            }
                            self.pending_len = Some(len);
                            self.filled = 0;
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e),
                    }
                }
                Some(len) => {
                    if self.filled == len {
                        return Ok(true);
                    }
                    match self.stream.read(&mut self.scratch[self.filled..len]) {
                        Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                        Ok(n) => self.filled += n,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    fn deliver(&mut self, frame: &mut Frame) {
        let len = self.pending_len.take().unwrap_or(0);
        frame.bytes_mut()[..len].copy_from_slice(&self.scratch[..len]);
        frame.set_len(len);
        self.filled = 0;
    }
}

impl FrameLink for TcpLink {
    fn poll_recv(&mut self, frame: &mut Frame) -> io::Result<bool> {
        self.set_mode(true)?;
        if self.fill_step()? {
            self.deliver(frame);
            return Ok(true);
        }
        Ok(false)
    }

    fn wait_recv(&mut self, frame: &mut Frame) -> io::Result<()> {
        self.set_mode(false)?;
        while !self.fill_step()? {}
        self.deliver(frame);
        Ok(())
    }

    fn start_send(&mut self, frame: &Frame) -> io::Result<()> {
        self.set_mode(false)?;
        self.stream.write_all(&[frame.len() as u8])?;
        self.stream.write_all(frame.payload())?;
        Ok(())
    }

    fn send_busy(&mut self) -> io::Result<bool> {
        // Writes drain into the socket buffer synchronously.
        Ok(false)
    }
}

/// Accepts host connections and services them with a [`Bridge`].
pub struct Server<B: Board> {
    board: B,
    config: Config,
    ticker: Ticker,
}

/// Builder to create a [`Server`] and adjust configuration options.
///
/// # Example
///
/// ```ignore
/// use xsusb_bridge::Builder;
///
/// let mut server = Builder::new()
///     .run_test_threshold(10_000)
///     .build(my_board)?;
/// server.listen("0.0.0.0:6671")?;
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Sets the record returned by the info command.
    pub fn device_info(mut self, info: DeviceInfo) -> Self {
        self.config.device_info = info;
        self
    }

    /// Sets the pulse count above which run-test uses the tick countdown.
    pub fn run_test_threshold(mut self, pulses: u32) -> Self {
        self.config.run_test_threshold = pulses;
        self
    }

    /// Sets the idle sleep between polls on dual-channel boards.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Builds the server, taking the board's LED for the tick thread.
    pub fn build<B: Board>(self, board: B) -> io::Result<Server<B>> {
        Server::new(board, self.config)
    }
}

impl<B: Board> Server<B> {
    pub fn new(mut board: B, config: Config) -> io::Result<Server<B>> {
        let ticker = Ticker::spawn(board.take_led())?;
        Ok(Server {
            board,
            config,
            ticker,
        })
    }

    /// Serves single-port hosts: one connection at a time, each a session.
    pub fn listen(&mut self, addr: impl ToSocketAddrs) -> io::Result<()> {
        let listener = TcpListener::bind(addr)?;
        self.serve(listener)
    }

    /// Serves connections accepted from an already-bound listener.
    pub fn serve(&mut self, listener: TcpListener) -> io::Result<()> {
        log::info!("Bridge listening for host connections");
        for stream in listener.incoming() {
            match stream {
                Ok(tcp) => {
                    if let Ok(peer) = tcp.peer_addr() {
                        log::info!("New host connection from {}", peer);
                    }
                    let end = self.run_session(tcp, None);
                    self.finish_session(end);
                }
                Err(e) => log::error!("Connection error: {}", e),
            }
        }
        Ok(())
    }

    /// Serves dual-port hosts: the host connects to the primary address and
    /// then the secondary address before the session starts.
    pub fn listen_dual(
        &mut self,
        primary: impl ToSocketAddrs,
        secondary: impl ToSocketAddrs,
    ) -> io::Result<()> {
        let primary_listener = TcpListener::bind(primary)?;
        let secondary_listener = TcpListener::bind(secondary)?;
        log::info!("Bridge listening for host connections on both channels");
        loop {
            match Self::accept_pair(&primary_listener, &secondary_listener) {
                Ok((first, second)) => {
                    let end = self.run_session(first, Some(second));
                    self.finish_session(end);
                }
                Err(e) => log::error!("Connection error: {}", e),
            }
        }
    }

    fn accept_pair(
        primary: &TcpListener,
        secondary: &TcpListener,
    ) -> io::Result<(TcpStream, TcpStream)> {
        let (first, peer) = primary.accept()?;
        log::info!("New host connection from {} (primary channel)", peer);
        let (second, peer) = secondary.accept()?;
        log::info!("New host connection from {} (secondary channel)", peer);
        Ok((first, second))
    }

    fn run_session(
        &mut self,
        primary: TcpStream,
        secondary: Option<TcpStream>,
    ) -> io::Result<SessionEnd> {
        let link = TcpLink::new(primary)?;
        let config = self.config.clone();
        let ticker = self.ticker.handle();
        let mut bridge = Bridge::new(&mut self.board, link, ticker, config);
        if let Some(tcp) = secondary {
            bridge.attach_secondary(TcpLink::new(tcp)?);
        }
        bridge.run()
    }

    fn finish_session(&mut self, end: io::Result<SessionEnd>) {
        match end {
            Ok(SessionEnd::ResetRequested) => log::info!("Session closed by reset command"),
            Ok(SessionEnd::Disconnected) => log::info!("Host disconnected"),
            Err(e) => log::error!("Session error: {}", e),
        }
        self.board.reset();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn frame_round_trip() {
        let (client, server) = socket_pair();
        let mut tx = TcpLink::new(client).unwrap();
        let mut rx = TcpLink::new(server).unwrap();

        let frame = Frame::from_payload(&[0x4F, 0x10, 0x00, 0x00, 0x00, 0x09, 0xA5, 0x3C]).unwrap();
        tx.start_send(&frame).unwrap();

        let mut received = Frame::empty();
        rx.wait_recv(&mut received).unwrap();
        assert_eq!(received, frame);
    }

    #[test]
    fn poll_reports_idle_then_completes() {
        let (mut client, server) = socket_pair();
        let mut rx = TcpLink::new(server).unwrap();

        let mut frame = Frame::empty();
        assert!(!rx.poll_recv(&mut frame).unwrap());

        client.write_all(&[2, 0xAA]).unwrap();
        client.write_all(&[0xBB]).unwrap();
        rx.wait_recv(&mut frame).unwrap();
        assert_eq!(frame.payload(), &[0xAA, 0xBB]);
    }

    #[test]
    fn zero_length_frame_round_trip() {
        let (client, server) = socket_pair();
        let mut tx = TcpLink::new(client).unwrap();
        let mut rx = TcpLink::new(server).unwrap();
        tx.start_send(&Frame::empty()).unwrap();
        let mut frame = Frame::from_payload(&[0xDE, 0xAD]).unwrap();
        rx.wait_recv(&mut frame).unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn closed_peer_reads_as_eof() {
        let (client, server) = socket_pair();
        let mut rx = TcpLink::new(server).unwrap();
        drop(client);
        let mut frame = Frame::empty();
        let err = rx.wait_recv(&mut frame).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn split_frames_reassemble_across_writes() {
        let (mut client, server) = socket_pair();
        let mut rx = TcpLink::new(server).unwrap();
        let writer = thread::spawn(move || {
            client.write_all(&[3]).unwrap();
            client.write_all(&[0x01]).unwrap();
            client.write_all(&[0x02, 0x03, 1, 0x31]).unwrap();
        });
        let mut frame = Frame::empty();
        rx.wait_recv(&mut frame).unwrap();
        assert_eq!(frame.payload(), &[0x01, 0x02, 0x03]);
        rx.wait_recv(&mut frame).unwrap();
        assert_eq!(frame.payload(), &[0x31]);
        writer.join().unwrap();
    }
}
