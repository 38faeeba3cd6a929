//! ATEM session layer -- reliable delivery over UDP and the two protocol roles.
//!
//! Everything here is sans-IO: roles are fed datagrams and clock ticks, and
//! hand datagrams to a [`Transport`]. Deadlines are reported through
//! `poll_timeout()`; the owner sleeps until then and calls `handle_timeout()`.

pub mod controller;
pub mod device;
pub mod session;
pub mod transport;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use atem_protocol::{ProtocolError, ProtocolTiming, Subscribers, SwitcherState, DEFAULT_TIMING};

pub use controller::ControllerRole;
pub use device::DeviceRole;
pub use session::{ReliabilitySession, SessionState};
pub use transport::{MemoryTransport, Transport};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection to {peer} timed out")]
    ConnectionTimeout { peer: SocketAddr },
    #[error("session closed")]
    SessionClosed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Session timing, resolved from [`ProtocolTiming`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub handshake_retry_interval: Duration,
    pub handshake_max_attempts: u32,
    pub ack_delay: Duration,
    pub retransmit_interval: Duration,
    pub max_retransmits: u32,
    pub keepalive_interval: Duration,
    pub inactivity_timeout: Duration,
    pub max_packet_size: usize,
    pub reorder_window: u16,
}

impl From<&ProtocolTiming> for SessionConfig {
    fn from(t: &ProtocolTiming) -> Self {
        Self {
            handshake_retry_interval: Duration::from_millis(t.handshake_retry_interval_ms),
            handshake_max_attempts: t.handshake_max_attempts,
            ack_delay: Duration::from_millis(t.ack_delay_ms),
            retransmit_interval: Duration::from_millis(t.retransmit_interval_ms),
            max_retransmits: t.max_retransmits,
            keepalive_interval: Duration::from_millis(t.keepalive_interval_ms),
            inactivity_timeout: Duration::from_millis(t.inactivity_timeout_ms),
            max_packet_size: t.max_packet_size,
            reorder_window: t.reorder_window,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&DEFAULT_TIMING)
    }
}

impl SessionConfig {
    /// Room for framed messages in one packet.
    pub fn max_payload(&self) -> usize {
        self.max_packet_size
            .clamp(atem_protocol::HEADER_LEN + 1, atem_protocol::MAX_PACKET_LEN)
            - atem_protocol::HEADER_LEN
    }
}

/// Something a role wants its owner to know about.
#[derive(Debug)]
pub enum RoleEvent {
    /// Handshake finished; the session is established.
    Connected { peer: SocketAddr, session_id: u16 },
    /// The device finished sending its initial state (`InCm`).
    Initialized { peer: SocketAddr },
    /// The session is gone. `error` is `None` for an orderly close.
    Disconnected {
        peer: SocketAddr,
        error: Option<SessionError>,
    },
}

/// Shared surface of [`ControllerRole`] and [`DeviceRole`], which is what a
/// socket driver needs.
pub trait ProtocolRole {
    /// Feed one inbound datagram. Bad datagrams are logged and dropped.
    fn handle_datagram(
        &mut self,
        datagram: &[u8],
        from: SocketAddr,
        now: Instant,
        transport: &mut dyn Transport,
    );

    /// Run everything due at `now`: retries, acks, flushes, timeouts.
    fn handle_timeout(&mut self, now: Instant, transport: &mut dyn Transport);

    /// Earliest instant `handle_timeout` has work to do.
    fn poll_timeout(&self) -> Option<Instant>;

    fn poll_event(&mut self) -> Option<RoleEvent>;

    fn subscribers_mut(&mut self) -> &mut Subscribers;

    fn state(&self) -> &SwitcherState;
}
