//! Protocol timing -- the parameter set both roles run the session layer with.
//!
//! Defaults match what switcher hardware expects from a controller: connect
//! retries every 20 ms, data retransmits every 100 ms, and a peer that stays
//! silent for five seconds is dropped.

/// Timing and sizing parameters for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolTiming {
    // -- Handshake --
    /// Milliseconds between repeated connect packets.
    pub handshake_retry_interval_ms: u64,
    /// Connect packets sent before giving up.
    pub handshake_max_attempts: u32,

    // -- Reliability --
    /// Longest an acknowledgement may be held back waiting for outbound data.
    pub ack_delay_ms: u64,
    /// Milliseconds before an unacknowledged packet is resent.
    pub retransmit_interval_ms: u64,
    /// Resends of one packet before the session is declared dead.
    pub max_retransmits: u32,

    // -- Liveness --
    /// Idle milliseconds before an empty reliable packet is sent.
    pub keepalive_interval_ms: u64,
    /// Silent milliseconds before the peer is declared gone.
    pub inactivity_timeout_ms: u64,

    // -- Sizing --
    /// Largest datagram produced when packing messages.
    pub max_packet_size: usize,
    /// Out-of-order packets buffered ahead of the next expected number.
    pub reorder_window: u16,
}

pub const DEFAULT_TIMING: ProtocolTiming = ProtocolTiming {
    handshake_retry_interval_ms: 20,
    handshake_max_attempts: 10,

    ack_delay_ms: 10,
    retransmit_interval_ms: 100,
    max_retransmits: 10,

    keepalive_interval_ms: 500,
    inactivity_timeout_ms: 5000,

    max_packet_size: 1420,
    reorder_window: 64,
};
