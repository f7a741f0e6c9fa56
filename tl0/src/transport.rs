//! Packet transport abstraction
//!
//! The session layer never touches sockets. Senders and receivers talk to
//! the network through [`Transport`]; RTCP feedback (generic NACK and FIR)
//! goes through the same seam.

use crate::rtp::RtpPacket;
use std::collections::VecDeque;
use std::io;
use tl0_protocol::nack::NackRecord;

/// Outbound side of an RTP/RTCP session
pub trait Transport {
    /// Send one RTP packet
    fn send(&mut self, packet: &RtpPacket) -> io::Result<()>;

    /// Send one generic NACK record (RTCP transport feedback)
    fn send_nack(&mut self, record: NackRecord) -> io::Result<()>;

    /// Send a full intra request (RTCP payload-specific feedback)
    fn send_keyframe_request(&mut self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, packet: &RtpPacket) -> io::Result<()> {
        (**self).send(packet)
    }

    fn send_nack(&mut self, record: NackRecord) -> io::Result<()> {
        (**self).send_nack(record)
    }

    fn send_keyframe_request(&mut self) -> io::Result<()> {
        (**self).send_keyframe_request()
    }
}

/// In-memory transport that queues everything it is asked to send
#[derive(Debug, Default)]
pub struct MemoryTransport {
    pub packets: VecDeque<RtpPacket>,
    pub nacks: VecDeque<NackRecord>,
    pub keyframe_requests: usize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, packet: &RtpPacket) -> io::Result<()> {
        self.packets.push_back(packet.clone());
        Ok(())
    }

    fn send_nack(&mut self, record: NackRecord) -> io::Result<()> {
        self.nacks.push_back(record);
        Ok(())
    }

    fn send_keyframe_request(&mut self) -> io::Result<()> {
        self.keyframe_requests += 1;
        Ok(())
    }
}
