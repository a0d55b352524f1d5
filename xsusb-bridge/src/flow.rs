//! Packet flow control.
//!
//! The transport hands packets over one at a time and can only be filling
//! or draining one buffer per direction at any moment. [`PacketIo`] keeps
//! two buffers per direction and alternates them: while the dispatcher or
//! engine works on one receive buffer the link is already filling the
//! other, and while the link drains one transmit buffer the engine composes
//! the next packet in its twin. Ownership of a buffer toggles exactly once
//! per packet, and the freed buffer is re-armed before the completed one is
//! surfaced, so the link is never left without somewhere to put data.

use std::io;

use xsusb_protocol::Frame;

/// A transport that moves whole packets to and from the host.
///
/// The USB shape of this interface: receives complete asynchronously into a
/// caller-owned buffer, transmits are queued and drain in the background,
/// and a queued transmit must not be overwritten while it is still busy.
pub trait FrameLink {
    /// Drives an in-flight inbound transfer without blocking. Returns true
    /// once `frame` holds a complete packet.
    fn poll_recv(&mut self, frame: &mut Frame) -> io::Result<bool>;

    /// Blocks until the next inbound packet has arrived in `frame`.
    fn wait_recv(&mut self, frame: &mut Frame) -> io::Result<()>;

    /// Queues a packet for transmission. Callers check [`FrameLink::send_busy`]
    /// first.
    fn start_send(&mut self, frame: &Frame) -> io::Result<()>;

    /// True while a previously queued packet is still draining.
    fn send_busy(&mut self) -> io::Result<bool>;
}

/// Ping-pong buffered packet I/O over a [`FrameLink`].
pub struct PacketIo<L> {
    link: L,
    rx: [Frame; 2],
    /// Slot the link fills next.
    rx_arming: usize,
    /// Slot holding the most recently surfaced packet.
    rx_active: usize,
    tx: [Frame; 2],
    /// Slot the engine composes the next outbound packet into.
    tx_filling: usize,
}

impl<L: FrameLink> PacketIo<L> {
    pub fn new(link: L) -> PacketIo<L> {
        PacketIo {
            link,
            rx: [Frame::empty(), Frame::empty()],
            rx_arming: 0,
            rx_active: 1,
            tx: [Frame::empty(), Frame::empty()],
            tx_filling: 0,
        }
    }

    /// Polls for a complete inbound packet. When one has arrived its slot
    /// becomes the active receive buffer and the other slot is re-armed for
    /// the transfer behind it.
    pub fn try_receive(&mut self) -> io::Result<bool> {
        let slot = self.rx_arming;
        if self.link.poll_recv(&mut self.rx[slot])? {
            self.rx_arming ^= 1;
            self.rx_active = slot;
            return Ok(true);
        }
        Ok(false)
    }

    /// Blocks until the next inbound packet is available. There is no
    /// timeout: a stalled host stalls the command that is waiting.
    pub fn receive(&mut self) -> io::Result<()> {
        let slot = self.rx_arming;
        self.link.wait_recv(&mut self.rx[slot])?;
        self.rx_arming ^= 1;
        self.rx_active = slot;
        Ok(())
    }

    /// The most recently received packet.
    pub fn recv_frame(&self) -> &Frame {
        &self.rx[self.rx_active]
    }

    /// The transmit buffer currently owned by the engine.
    pub fn send_frame(&mut self) -> &mut Frame {
        &mut self.tx[self.tx_filling]
    }

    /// The active receive buffer and the engine-owned transmit buffer, for
    /// callers that read one while writing the other.
    pub fn frames(&mut self) -> (&Frame, &mut Frame) {
        (&self.rx[self.rx_active], &mut self.tx[self.tx_filling])
    }

    /// Sends the first `len` bytes of the engine-owned transmit buffer and
    /// hands the engine its twin. Waits for the previous transmit to finish
    /// draining before queueing this one.
    pub fn send(&mut self, len: usize) -> io::Result<()> {
        self.tx[self.tx_filling].set_len(len);
        while self.link.send_busy()? {
            std::hint::spin_loop();
        }
        self.link.start_send(&self.tx[self.tx_filling])?;
        self.tx_filling ^= 1;
        self.tx[self.tx_filling].clear();
        Ok(())
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::ScriptLink;

    #[test]
    fn receive_alternates_buffers() {
        let mut link = ScriptLink::default();
        link.push_inbound(&[0x31]);
        link.push_inbound(&[0x40]);
        let mut io = PacketIo::new(link);

        assert!(io.try_receive().unwrap());
        let first = io.recv_frame() as *const Frame;
        assert_eq!(io.recv_frame().payload(), &[0x31]);

        assert!(io.try_receive().unwrap());
        let second = io.recv_frame() as *const Frame;
        assert_eq!(io.recv_frame().payload(), &[0x40]);

        assert_ne!(first, second, "consecutive packets must land in different buffers");
    }

    #[test]
    fn try_receive_reports_idle_link() {
        let mut io = PacketIo::new(ScriptLink::default());
        assert!(!io.try_receive().unwrap());
    }

    #[test]
    fn send_alternates_buffers_and_preserves_order() {
        let mut io = PacketIo::new(ScriptLink::default());
        io.send_frame().bytes_mut()[0] = 0xAA;
        io.send(1).unwrap();
        io.send_frame().bytes_mut()[0] = 0xBB;
        io.send(1).unwrap();

        let link = io.into_link();
        let sent = link.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].payload(), &[0xAA]);
        assert_eq!(sent[1].payload(), &[0xBB]);
    }

    #[test]
    fn send_waits_for_busy_link() {
        let mut link = ScriptLink::default();
        link.set_busy_sends(3);
        let mut io = PacketIo::new(link);
        io.send_frame().bytes_mut()[0] = 0xCC;
        io.send(1).unwrap();
        let link = io.into_link();
        assert_eq!(link.busy_polls(), 3);
        assert_eq!(link.sent().len(), 1);
    }

    #[test]
    fn blocking_receive_drains_in_order() {
        let mut link = ScriptLink::default();
        link.push_inbound(&[0x01, 0x02]);
        link.push_inbound(&[0x03]);
        let mut io = PacketIo::new(link);
        io.receive().unwrap();
        assert_eq!(io.recv_frame().payload(), &[0x01, 0x02]);
        io.receive().unwrap();
        assert_eq!(io.recv_frame().payload(), &[0x03]);
    }
}
