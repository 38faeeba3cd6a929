//! Device role: serves a switcher state to any number of controllers, one
//! session per remote address.
//!
//! A new controller receives the full state dump once its handshake
//! completes. Commands from any controller are applied to the state and the
//! resulting change is broadcast to every established controller.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use atem_protocol::{packet, Message, MessageRegistry, Packet, Subscribers, SwitcherState};
use rand::Rng;

use crate::session::{ReliabilitySession, SessionState};
use crate::transport::Transport;
use crate::{ProtocolRole, RoleEvent, SessionConfig, SessionError};

/// Session identifiers are 15-bit and never zero.
const MAX_SESSION_ID: u16 = 0x7fff;

pub struct DeviceRole {
    state: SwitcherState,
    registry: Arc<MessageRegistry>,
    config: SessionConfig,
    sessions: HashMap<SocketAddr, ReliabilitySession>,
    subscribers: Subscribers,
    events: VecDeque<RoleEvent>,
}

impl DeviceRole {
    pub fn new(state: SwitcherState, registry: Arc<MessageRegistry>, config: SessionConfig) -> Self {
        Self {
            state,
            registry,
            config,
            sessions: HashMap::new(),
            subscribers: Subscribers::new(),
            events: VecDeque::new(),
        }
    }

    pub fn session(&self, peer: &SocketAddr) -> Option<&ReliabilitySession> {
        self.sessions.get(peer)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Apply a change originating on the device itself and broadcast it.
    pub fn publish(&mut self, message: Message, now: Instant) {
        message.apply(&mut self.state);
        self.broadcast(&message, now);
    }

    /// Disconnect one controller.
    pub fn close(&mut self, peer: &SocketAddr) {
        if let Some(mut session) = self.sessions.remove(peer) {
            session.close();
            tracing::info!(%peer, "device: session closed");
            self.events.push_back(RoleEvent::Disconnected {
                peer: *peer,
                error: None,
            });
        }
    }

    /// Disconnect every controller.
    pub fn close_all(&mut self) {
        let peers: Vec<SocketAddr> = self.sessions.keys().copied().collect();
        for peer in peers {
            self.close(&peer);
        }
    }

    fn allocate_session_id(&self) -> u16 {
        let mut rng = rand::thread_rng();
        loop {
            let id = rng.gen_range(1..=MAX_SESSION_ID);
            if !self.sessions.values().any(|s| s.session_id() == id) {
                return id;
            }
        }
    }

    fn handle_connect(
        &mut self,
        packet: &Packet,
        from: SocketAddr,
        now: Instant,
        transport: &mut dyn Transport,
    ) {
        if let Some(existing) = self.sessions.get_mut(&from) {
            match existing.state() {
                SessionState::HandshakeReceived => {
                    if let Err(e) = existing.handle_packet(packet.clone(), now, transport) {
                        self.fail(from, e);
                    }
                    return;
                }
                SessionState::Established if packet.is_repeated() => {
                    tracing::debug!(%from, "device: stale connect retry ignored");
                    return;
                }
                _ => {
                    // A fresh connect on a live session: the controller restarted.
                    tracing::info!(%from, "device: controller reconnected");
                    self.close(&from);
                }
            }
        }

        let session_id = self.allocate_session_id();
        let mut session = ReliabilitySession::new(from, self.config, now);
        session.accept(session_id, packet, now, transport);
        self.sessions.insert(from, session);
        tracing::info!(%from, session_id, "device: controller connecting");
    }

    /// Queue the full state dump for one freshly established session. The
    /// dump is encoded up front; if any message fails nothing is queued.
    fn send_initial_state(&mut self, peer: SocketAddr, now: Instant) -> Result<(), SessionError> {
        let Some(session) = self.sessions.get_mut(&peer) else {
            return Ok(());
        };
        let frames = self
            .state
            .to_messages()
            .iter()
            .map(|message| self.registry.encode(message))
            .collect::<Result<Vec<_>, _>>()?;
        let count = frames.len();
        for frame in frames {
            session.queue(frame, now)?;
        }
        tracing::debug!(%peer, messages = count, "device: initial state queued");
        Ok(())
    }

    fn broadcast(&mut self, message: &Message, now: Instant) {
        let frame = match self.registry.encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(tag = %message.tag(), error = %e, "device: broadcast encode failed");
                return;
            }
        };
        for (peer, session) in self.sessions.iter_mut() {
            if !session.state().is_established() {
                continue;
            }
            if let Err(e) = session.queue(frame.clone(), now) {
                tracing::warn!(%peer, error = %e, "device: broadcast queue failed");
            }
        }
    }

    fn deliver(&mut self, from: SocketAddr, payload: &[u8], now: Instant) {
        let results = match self.registry.dispatch_payload(payload) {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(%from, error = %e, "device: bad payload skipped");
                return;
            }
        };
        for result in results {
            let message = match result {
                Ok(message) => message,
                Err(e) => {
                    tracing::debug!(%from, error = %e, "device: message skipped");
                    continue;
                }
            };
            self.subscribers.notify(&message);
            if !message.is_command() {
                continue;
            }
            match self.state.apply_command(&message) {
                Some(change) => self.broadcast(&change, now),
                None => {
                    tracing::debug!(%from, tag = %message.tag(), "device: command not applicable");
                }
            }
        }
    }

    fn fail(&mut self, peer: SocketAddr, error: SessionError) {
        tracing::warn!(%peer, error = %error, "device: session lost");
        self.sessions.remove(&peer);
        self.events.push_back(RoleEvent::Disconnected {
            peer,
            error: Some(error),
        });
    }
}

impl ProtocolRole for DeviceRole {
    fn handle_datagram(
        &mut self,
        datagram: &[u8],
        from: SocketAddr,
        now: Instant,
        transport: &mut dyn Transport,
    ) {
        let packet = match packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(
                    %from,
                    error = %e,
                    datagram = %hex::encode(datagram),
                    "device: malformed datagram dropped"
                );
                return;
            }
        };

        if packet.is_connect() {
            self.handle_connect(&packet, from, now, transport);
            return;
        }

        let Some(session) = self.sessions.get_mut(&from) else {
            tracing::debug!(%from, "device: packet without session ignored");
            return;
        };
        let received = match session.handle_packet(packet, now, transport) {
            Ok(received) => received,
            Err(e) => {
                self.fail(from, e);
                return;
            }
        };
        if received.established {
            let session_id = session.session_id();
            self.events.push_back(RoleEvent::Connected {
                peer: from,
                session_id,
            });
            if let Err(e) = self.send_initial_state(from, now) {
                self.fail(from, e);
                return;
            }
        }
        for payload in &received.payloads {
            self.deliver(from, payload, now);
        }
    }

    fn handle_timeout(&mut self, now: Instant, transport: &mut dyn Transport) {
        let mut failed = Vec::new();
        for (peer, session) in self.sessions.iter_mut() {
            if let Err(e) = session.handle_timeout(now, transport) {
                failed.push((*peer, e));
            }
        }
        for (peer, error) in failed {
            self.fail(peer, error);
        }
    }

    fn poll_timeout(&self) -> Option<Instant> {
        self.sessions
            .values()
            .filter_map(ReliabilitySession::poll_timeout)
            .min()
    }

    fn poll_event(&mut self) -> Option<RoleEvent> {
        self.events.pop_front()
    }

    fn subscribers_mut(&mut self) -> &mut Subscribers {
        &mut self.subscribers
    }

    fn state(&self) -> &SwitcherState {
        &self.state
    }
}
