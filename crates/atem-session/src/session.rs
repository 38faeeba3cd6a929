//! Reliability session -- one per remote address.
//!
//! Provides ordered, acknowledged, at-least-once delivery on top of UDP:
//!
//! - handshake: `CONNECT` request and reply, both retried until answered
//! - ordering: reliable packets are delivered strictly by packet number,
//!   with a bounded reorder buffer for packets that arrive early
//! - duplicates: anything at or below the delivered watermark is acked again
//!   but never redelivered
//! - acknowledgement: cumulative, delayed by at most `ack_delay`, and
//!   piggybacked on outbound data when possible
//! - retransmission: unacknowledged packets are resent with `REPEATED` until
//!   `max_retransmits` is exhausted
//!
//! Packet numbers are 16-bit and compared with serial arithmetic.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use atem_protocol::{envelope, FramedMessage, Packet, PacketFlags, ProtocolError};
use bytes::Bytes;

use crate::transport::{transmit, Transport};
use crate::{SessionConfig, SessionError};

/// Handshake body a controller opens with.
pub const CONNECT_REQUEST: [u8; 8] = [0x01, 0, 0, 0, 0, 0, 0, 0];
/// Handshake body a device accepts with.
pub const CONNECT_ACCEPT: [u8; 8] = [0x02, 0, 0, 0, 0, 0, 0, 0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Controller sent `CONNECT`, waiting for the reply.
    AwaitingHandshake,
    /// Device replied to `CONNECT`, waiting for the controller's ack.
    HandshakeReceived,
    Established,
    Closed,
}

impl SessionState {
    pub fn is_established(self) -> bool {
        self == SessionState::Established
    }

    pub fn name(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingHandshake => "awaiting_handshake",
            SessionState::HandshakeReceived => "handshake_received",
            SessionState::Established => "established",
            SessionState::Closed => "closed",
        }
    }
}

/// `after` past `at`, or `None` when that lies beyond what `Instant` can
/// represent. A timer with no deadline never fires.
fn deadline(at: Instant, after: Duration) -> Option<Instant> {
    at.checked_add(after)
}

/// `now` is at or past `since + after`.
fn reached(now: Instant, since: Instant, after: Duration) -> bool {
    deadline(since, after).is_some_and(|at| now >= at)
}

/// `a` is at or before `b` in 16-bit serial order.
pub fn serial_le(a: u16, b: u16) -> bool {
    b.wrapping_sub(a) < 0x8000
}

#[derive(Debug)]
struct Retry {
    packet: Packet,
    sent_at: Instant,
    attempts: u32,
}

/// What one inbound packet produced.
#[derive(Debug, Default)]
pub struct Received {
    /// The handshake completed with this packet.
    pub established: bool,
    /// Payloads now deliverable, in packet-number order.
    pub payloads: Vec<Bytes>,
}

#[derive(Debug)]
pub struct ReliabilitySession {
    peer: SocketAddr,
    session_id: u16,
    state: SessionState,
    config: SessionConfig,

    next_number: u16,
    delivered: u16,
    reorder: HashMap<u16, Packet>,
    pending_ack: Option<Instant>,

    outbox: VecDeque<FramedMessage>,
    flush_at: Option<Instant>,
    in_flight: VecDeque<Retry>,
    handshake: Option<Retry>,

    last_heard: Instant,
    last_sent: Instant,
}

impl ReliabilitySession {
    pub fn new(peer: SocketAddr, config: SessionConfig, now: Instant) -> Self {
        Self {
            peer,
            session_id: 0,
            state: SessionState::Idle,
            config,
            next_number: 1,
            delivered: 0,
            reorder: HashMap::new(),
            pending_ack: None,
            outbox: VecDeque::new(),
            flush_at: None,
            in_flight: VecDeque::new(),
            handshake: None,
            last_heard: now,
            last_sent: now,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Highest inbound packet number delivered in order.
    pub fn delivered(&self) -> u16 {
        self.delivered
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Controller side: open the handshake.
    pub fn connect(&mut self, now: Instant, transport: &mut dyn Transport) {
        self.state = SessionState::AwaitingHandshake;
        self.session_id = 0;
        let packet = Packet {
            flags: PacketFlags::CONNECT,
            session_id: 0,
            acknowledgement: 0,
            number: 0,
            payload: Bytes::from_static(&CONNECT_REQUEST),
        };
        self.send_handshake(packet, now, transport);
        tracing::debug!(peer = %self.peer, "session: connect sent");
    }

    /// Device side: answer a controller's `CONNECT` under `session_id`.
    pub fn accept(
        &mut self,
        session_id: u16,
        request: &Packet,
        now: Instant,
        transport: &mut dyn Transport,
    ) {
        self.state = SessionState::HandshakeReceived;
        self.session_id = session_id;
        self.last_heard = now;
        let reply = Packet {
            flags: PacketFlags::CONNECT | PacketFlags::ACK,
            session_id,
            acknowledgement: request.number,
            number: 0,
            payload: Bytes::from_static(&CONNECT_ACCEPT),
        };
        self.send_handshake(reply, now, transport);
        tracing::debug!(peer = %self.peer, session_id, "session: connect accepted");
    }

    fn send_handshake(&mut self, packet: Packet, now: Instant, transport: &mut dyn Transport) {
        transmit(transport, &packet, self.peer);
        self.last_sent = now;
        self.handshake = Some(Retry {
            packet,
            sent_at: now,
            attempts: 1,
        });
    }

    pub fn handle_packet(
        &mut self,
        packet: Packet,
        now: Instant,
        transport: &mut dyn Transport,
    ) -> Result<Received, SessionError> {
        let mut received = Received::default();
        match self.state {
            SessionState::Closed => return Err(SessionError::SessionClosed),
            SessionState::Idle => return Ok(received),
            _ => {}
        }

        if packet.is_connect() {
            self.handle_connect(&packet, now, transport, &mut received);
            return Ok(received);
        }
        if self.state == SessionState::AwaitingHandshake {
            return Ok(received);
        }
        if packet.session_id != self.session_id {
            tracing::debug!(
                peer = %self.peer,
                expected = self.session_id,
                got = packet.session_id,
                "session: packet for another session dropped"
            );
            return Ok(received);
        }
        self.last_heard = now;

        if self.state == SessionState::HandshakeReceived {
            if !packet.is_ack() {
                return Ok(received);
            }
            self.state = SessionState::Established;
            self.handshake = None;
            received.established = true;
            tracing::info!(peer = %self.peer, session_id = self.session_id, "session: established");
        }

        if packet.is_ack() {
            self.acknowledge(packet.acknowledgement);
        }
        if packet.requests_ack() {
            self.receive_reliable(packet, now, &mut received);
        }
        Ok(received)
    }

    fn handle_connect(
        &mut self,
        packet: &Packet,
        now: Instant,
        transport: &mut dyn Transport,
        received: &mut Received,
    ) {
        match self.state {
            SessionState::AwaitingHandshake if packet.is_ack() => {
                if packet.payload.first() != Some(&CONNECT_ACCEPT[0]) {
                    tracing::debug!(
                        peer = %self.peer,
                        payload = %hex::encode(&packet.payload),
                        "session: unexpected handshake reply ignored"
                    );
                    return;
                }
                self.session_id = packet.session_id;
                self.state = SessionState::Established;
                self.handshake = None;
                self.last_heard = now;
                self.delivered = packet.number;
                self.pending_ack = Some(now);
                received.established = true;
                tracing::info!(peer = %self.peer, session_id = self.session_id, "session: established");
            }
            SessionState::Established
                if packet.is_ack() && packet.session_id == self.session_id =>
            {
                // Our ack of the reply was lost and the device is repeating it.
                self.last_heard = now;
                self.pending_ack = Some(now);
            }
            SessionState::HandshakeReceived => {
                self.last_heard = now;
                if let Some(retry) = &mut self.handshake {
                    retry.packet.flags.insert(PacketFlags::REPEATED);
                    transmit(transport, &retry.packet, self.peer);
                    retry.sent_at = now;
                    self.last_sent = now;
                }
            }
            _ => {
                tracing::debug!(
                    peer = %self.peer,
                    state = self.state.name(),
                    "session: stray connect packet ignored"
                );
            }
        }
    }

    /// Drop every in-flight packet covered by a cumulative ack.
    fn acknowledge(&mut self, ack: u16) {
        let before = self.in_flight.len();
        self.in_flight.retain(|r| !serial_le(r.packet.number, ack));
        let acked = before - self.in_flight.len();
        if acked > 0 {
            tracing::trace!(peer = %self.peer, ack, acked, "session: acked");
        }
    }

    fn receive_reliable(&mut self, packet: Packet, now: Instant, received: &mut Received) {
        let number = packet.number;
        let ahead = number.wrapping_sub(self.delivered);
        if ahead == 0 || ahead >= 0x8000 {
            tracing::debug!(peer = %self.peer, number, "session: duplicate acknowledged");
        } else if ahead == 1 {
            self.deliver(packet, received);
            while let Some(next) = self.reorder.remove(&self.delivered.wrapping_add(1)) {
                self.deliver(next, received);
            }
        } else if ahead <= self.config.reorder_window {
            self.reorder.entry(number).or_insert(packet);
        } else {
            tracing::debug!(
                peer = %self.peer,
                number,
                delivered = self.delivered,
                "session: packet beyond reorder window dropped"
            );
            return;
        }
        self.pending_ack
            .get_or_insert(deadline(now, self.config.ack_delay).unwrap_or(now));
    }

    fn deliver(&mut self, packet: Packet, received: &mut Received) {
        self.delivered = packet.number;
        if !packet.payload.is_empty() {
            received.payloads.push(packet.payload);
        }
    }

    /// Queue one frame for reliable delivery. It goes out on the next
    /// `handle_timeout` once the session is established.
    pub fn queue(&mut self, frame: FramedMessage, now: Instant) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::SessionClosed);
        }
        let max = self.config.max_payload();
        if frame.encoded_len() > max {
            return Err(ProtocolError::MessageTooLarge {
                size: frame.encoded_len(),
                max,
            }
            .into());
        }
        self.outbox.push_back(frame);
        self.flush_at.get_or_insert(now);
        Ok(())
    }

    /// Run every timer due at `now`. On error the session is already closed.
    pub fn handle_timeout(
        &mut self,
        now: Instant,
        transport: &mut dyn Transport,
    ) -> Result<(), SessionError> {
        if matches!(self.state, SessionState::Closed | SessionState::Idle) {
            return Ok(());
        }
        let established = self.state.is_established();

        // 1. Handshake retries
        self.retry_handshake(now, transport)?;

        // 2. Peer silence
        if matches!(
            self.state,
            SessionState::HandshakeReceived | SessionState::Established
        ) && reached(now, self.last_heard, self.config.inactivity_timeout)
        {
            tracing::warn!(peer = %self.peer, session_id = self.session_id, "session: peer inactive");
            return Err(self.fail());
        }

        // 3. Retransmissions
        self.retransmit(now, transport)?;

        // 4. Outbox, carrying any pending ack
        if established && self.flush_at.is_some_and(|at| now >= at) {
            self.flush(now, transport);
        }

        // 5. Standalone ack
        if established && self.pending_ack.is_some_and(|at| now >= at) {
            self.send_ack(now, transport);
        }

        // 6. Keepalive
        if established
            && self.in_flight.is_empty()
            && self.outbox.is_empty()
            && reached(now, self.last_sent, self.config.keepalive_interval)
        {
            tracing::trace!(peer = %self.peer, "session: keepalive");
            self.send_reliable(Bytes::new(), now, transport);
        }
        Ok(())
    }

    fn retry_handshake(
        &mut self,
        now: Instant,
        transport: &mut dyn Transport,
    ) -> Result<(), SessionError> {
        let Some(retry) = self.handshake.as_mut() else {
            return Ok(());
        };
        if !reached(now, retry.sent_at, self.config.handshake_retry_interval) {
            return Ok(());
        }
        if retry.attempts >= self.config.handshake_max_attempts {
            tracing::warn!(
                peer = %self.peer,
                attempts = retry.attempts,
                "session: handshake unanswered"
            );
            return Err(self.fail());
        }
        retry.attempts += 1;
        retry.sent_at = now;
        retry.packet.flags.insert(PacketFlags::REPEATED);
        transmit(transport, &retry.packet, self.peer);
        self.last_sent = now;
        Ok(())
    }

    fn retransmit(&mut self, now: Instant, transport: &mut dyn Transport) -> Result<(), SessionError> {
        let mut resent = 0;
        let mut exhausted = false;
        for retry in self.in_flight.iter_mut() {
            if !reached(now, retry.sent_at, self.config.retransmit_interval) {
                continue;
            }
            if retry.attempts >= self.config.max_retransmits {
                exhausted = true;
                break;
            }
            retry.attempts += 1;
            retry.sent_at = now;
            retry.packet.flags.insert(PacketFlags::REPEATED);
            transmit(transport, &retry.packet, self.peer);
            resent += 1;
        }
        if exhausted {
            tracing::warn!(peer = %self.peer, session_id = self.session_id, "session: retransmits exhausted");
            return Err(self.fail());
        }
        if resent > 0 {
            self.last_sent = now;
            tracing::debug!(peer = %self.peer, resent, "session: retransmitted");
        }
        Ok(())
    }

    /// Pack the outbox greedily into as few packets as fit.
    fn flush(&mut self, now: Instant, transport: &mut dyn Transport) {
        self.flush_at = None;
        let max = self.config.max_payload();
        while !self.outbox.is_empty() {
            let mut batch = Vec::new();
            let mut size = 0;
            while let Some(frame) = self.outbox.front() {
                let len = frame.encoded_len();
                if !batch.is_empty() && size + len > max {
                    break;
                }
                size += len;
                batch.extend(self.outbox.pop_front());
            }
            match envelope::encode(&batch) {
                Ok(payload) => self.send_reliable(payload, now, transport),
                Err(e) => {
                    tracing::warn!(peer = %self.peer, error = %e, "session: dropping unencodable batch")
                }
            }
        }
    }

    fn send_reliable(&mut self, payload: Bytes, now: Instant, transport: &mut dyn Transport) {
        let number = self.next_number;
        self.next_number = number.wrapping_add(1);

        let mut flags = PacketFlags::ACK_REQUEST;
        let mut acknowledgement = 0;
        if self.pending_ack.take().is_some() {
            flags.insert(PacketFlags::ACK);
            acknowledgement = self.delivered;
        }
        let packet = Packet {
            flags,
            session_id: self.session_id,
            acknowledgement,
            number,
            payload,
        };
        transmit(transport, &packet, self.peer);
        self.last_sent = now;
        self.in_flight.push_back(Retry {
            packet,
            sent_at: now,
            attempts: 0,
        });
    }

    fn send_ack(&mut self, now: Instant, transport: &mut dyn Transport) {
        self.pending_ack = None;
        let packet = Packet {
            flags: PacketFlags::ACK,
            session_id: self.session_id,
            acknowledgement: self.delivered,
            number: 0,
            payload: Bytes::new(),
        };
        transmit(transport, &packet, self.peer);
        self.last_sent = now;
    }

    /// Earliest instant at which `handle_timeout` has work to do.
    pub fn poll_timeout(&self) -> Option<Instant> {
        let live = matches!(
            self.state,
            SessionState::HandshakeReceived | SessionState::Established
        );
        let established = self.state.is_established();
        let idle = self.in_flight.is_empty() && self.outbox.is_empty();
        let c = &self.config;
        [
            self.handshake
                .as_ref()
                .and_then(|r| deadline(r.sent_at, c.handshake_retry_interval)),
            live
                .then(|| deadline(self.last_heard, c.inactivity_timeout))
                .flatten(),
            self.in_flight
                .iter()
                .filter_map(|r| deadline(r.sent_at, c.retransmit_interval))
                .min(),
            self.flush_at.filter(|_| established),
            self.pending_ack.filter(|_| established),
            (established && idle)
                .then(|| deadline(self.last_sent, c.keepalive_interval))
                .flatten(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Cancel every timer and discard buffered state.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.handshake = None;
        self.pending_ack = None;
        self.flush_at = None;
        self.in_flight.clear();
        self.outbox.clear();
        self.reorder.clear();
    }

    fn fail(&mut self) -> SessionError {
        self.close();
        SessionError::ConnectionTimeout { peer: self.peer }
    }
}
