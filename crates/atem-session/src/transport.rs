//! Transport boundary. Roles never own sockets; they push datagrams here.

use std::io;
use std::net::SocketAddr;

use atem_protocol::packet::{self, Packet};
use bytes::Bytes;

pub trait Transport {
    fn send(&mut self, datagram: Bytes, to: SocketAddr) -> io::Result<()>;
}

/// Records every datagram instead of sending it.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    pub sent: Vec<(SocketAddr, Bytes)>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything sent so far.
    pub fn drain(&mut self) -> Vec<(SocketAddr, Bytes)> {
        std::mem::take(&mut self.sent)
    }

    /// Decoded view of what was sent, skipping anything undecodable.
    pub fn packets(&self) -> Vec<(SocketAddr, Packet)> {
        self.sent
            .iter()
            .filter_map(|(to, raw)| packet::decode(raw).ok().map(|p| (*to, p)))
            .collect()
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, datagram: Bytes, to: SocketAddr) -> io::Result<()> {
        self.sent.push((to, datagram));
        Ok(())
    }
}

/// Encode and send. Failures are logged; UDP loss is recovered by
/// retransmission either way.
pub(crate) fn transmit(transport: &mut dyn Transport, packet: &Packet, to: SocketAddr) {
    let datagram = match packet::encode(packet) {
        Ok(datagram) => datagram,
        Err(e) => {
            tracing::warn!(%to, number = packet.number, error = %e, "transport: encode failed");
            return;
        }
    };
    if let Err(e) = transport.send(datagram, to) {
        tracing::debug!(%to, number = packet.number, error = %e, "transport: send failed");
    }
}
