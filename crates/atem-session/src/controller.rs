//! Controller role: connects to one switcher, mirrors its state, sends
//! commands.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use atem_protocol::{packet, Message, MessageRegistry, Subscribers, SwitcherState};
use bytes::Bytes;

use crate::session::ReliabilitySession;
use crate::transport::Transport;
use crate::{ProtocolRole, RoleEvent, SessionConfig, SessionError};

pub struct ControllerRole {
    device: SocketAddr,
    registry: Arc<MessageRegistry>,
    config: SessionConfig,
    session: Option<ReliabilitySession>,
    mirror: SwitcherState,
    subscribers: Subscribers,
    events: VecDeque<RoleEvent>,
}

impl ControllerRole {
    pub fn new(device: SocketAddr, registry: Arc<MessageRegistry>, config: SessionConfig) -> Self {
        Self {
            device,
            registry,
            config,
            session: None,
            mirror: SwitcherState::default(),
            subscribers: Subscribers::new(),
            events: VecDeque::new(),
        }
    }

    pub fn device(&self) -> SocketAddr {
        self.device
    }

    pub fn session(&self) -> Option<&ReliabilitySession> {
        self.session.as_ref()
    }

    pub fn is_established(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.state().is_established())
    }

    /// Start (or restart) the handshake. The state mirror starts over.
    pub fn connect(&mut self, now: Instant, transport: &mut dyn Transport) {
        if let Some(mut old) = self.session.take() {
            old.close();
        }
        self.mirror = SwitcherState::default();
        let mut session = ReliabilitySession::new(self.device, self.config, now);
        session.connect(now, transport);
        self.session = Some(session);
        tracing::info!(device = %self.device, "controller: connecting");
    }

    /// Queue messages for the device. They go out on the next
    /// `handle_timeout` once connected.
    pub fn send(&mut self, messages: &[Message], now: Instant) -> Result<(), SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::SessionClosed)?;
        for message in messages {
            let frame = self.registry.encode(message)?;
            session.queue(frame, now)?;
        }
        Ok(())
    }

    /// Tear down the session. Pending retransmissions and acks are dropped.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
            tracing::info!(device = %self.device, "controller: closed");
            self.events.push_back(RoleEvent::Disconnected {
                peer: self.device,
                error: None,
            });
        }
    }

    fn fail(&mut self, error: SessionError) {
        tracing::warn!(device = %self.device, error = %error, "controller: session lost");
        self.session = None;
        self.events.push_back(RoleEvent::Disconnected {
            peer: self.device,
            error: Some(error),
        });
    }

    fn deliver(&mut self, payload: &Bytes) {
        let results = match self.registry.dispatch_payload(payload) {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(device = %self.device, error = %e, "controller: bad payload skipped");
                return;
            }
        };
        for result in results {
            match result {
                Ok(message) => {
                    message.apply(&mut self.mirror);
                    self.subscribers.notify(&message);
                    if matches!(message, Message::InitiationComplete(_)) {
                        tracing::info!(
                            device = %self.device,
                            sources = self.mirror.sources.len(),
                            "controller: initial state received"
                        );
                        self.events
                            .push_back(RoleEvent::Initialized { peer: self.device });
                    }
                }
                Err(e) => {
                    tracing::debug!(device = %self.device, error = %e, "controller: message skipped");
                }
            }
        }
    }
}

impl ProtocolRole for ControllerRole {
    fn handle_datagram(
        &mut self,
        datagram: &[u8],
        from: SocketAddr,
        now: Instant,
        transport: &mut dyn Transport,
    ) {
        if from != self.device {
            tracing::debug!(%from, "controller: datagram from unknown address ignored");
            return;
        }
        let packet = match packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(
                    %from,
                    error = %e,
                    datagram = %hex::encode(datagram),
                    "controller: malformed datagram dropped"
                );
                return;
            }
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.handle_packet(packet, now, transport) {
            Ok(received) => {
                if received.established {
                    self.events.push_back(RoleEvent::Connected {
                        peer: self.device,
                        session_id: session.session_id(),
                    });
                }
                for payload in &received.payloads {
                    self.deliver(payload);
                }
            }
            Err(e) => self.fail(e),
        }
    }

    fn handle_timeout(&mut self, now: Instant, transport: &mut dyn Transport) {
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.handle_timeout(now, transport) {
                self.fail(e);
            }
        }
    }

    fn poll_timeout(&self) -> Option<Instant> {
        self.session.as_ref().and_then(ReliabilitySession::poll_timeout)
    }

    fn poll_event(&mut self) -> Option<RoleEvent> {
        self.events.pop_front()
    }

    fn subscribers_mut(&mut self) -> &mut Subscribers {
        &mut self.subscribers
    }

    fn state(&self) -> &SwitcherState {
        &self.mirror
    }
}
