//! Test harness: one controller and one device joined by an in-memory link.
//!
//! Time only moves when the test asks it to. Every datagram that crosses the
//! link is recorded in `wire`, and a drop filter can discard datagrams to
//! simulate loss.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use atem_protocol::{packet, MessageRegistry, Packet, SwitcherState};
use atem_session::{
    ControllerRole, DeviceRole, MemoryTransport, ProtocolRole, RoleEvent, SessionConfig,
};
use bytes::Bytes;

pub fn controller_addr() -> SocketAddr {
    "192.168.10.50:51234".parse().unwrap()
}

pub fn device_addr() -> SocketAddr {
    "192.168.10.240:9910".parse().unwrap()
}

pub fn registry() -> Arc<MessageRegistry> {
    Arc::new(MessageRegistry::standard().unwrap())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToDevice,
    ToController,
}

#[derive(Debug, Clone)]
pub struct Datagram {
    pub direction: Direction,
    pub raw: Bytes,
    pub packet: Packet,
    pub dropped: bool,
}

impl Datagram {
    /// Reliable packet carrying messages.
    pub fn is_data(&self) -> bool {
        !self.packet.is_connect() && self.packet.requests_ack() && !self.packet.payload.is_empty()
    }
}

type DropFilter = Box<dyn FnMut(&Datagram) -> bool>;

pub struct TestLink {
    pub controller: ControllerRole,
    pub device: DeviceRole,
    pub now: Instant,
    pub start: Instant,
    pub wire: Vec<Datagram>,
    pub controller_events: Vec<RoleEvent>,
    pub device_events: Vec<RoleEvent>,
    controller_out: MemoryTransport,
    device_out: MemoryTransport,
    drop_filter: Option<DropFilter>,
}

#[allow(dead_code)]
impl TestLink {
    pub fn new(state: SwitcherState) -> Self {
        Self::with_config(state, SessionConfig::default())
    }

    pub fn with_config(state: SwitcherState, config: SessionConfig) -> Self {
        let registry = registry();
        let now = Instant::now();
        Self {
            controller: ControllerRole::new(device_addr(), registry.clone(), config),
            device: DeviceRole::new(state, registry, config),
            now,
            start: now,
            wire: Vec::new(),
            controller_events: Vec::new(),
            device_events: Vec::new(),
            controller_out: MemoryTransport::new(),
            device_out: MemoryTransport::new(),
            drop_filter: None,
        }
    }

    /// Drop every datagram for which `filter` returns true.
    pub fn set_drop_filter(&mut self, filter: impl FnMut(&Datagram) -> bool + 'static) {
        self.drop_filter = Some(Box::new(filter));
    }

    pub fn clear_drop_filter(&mut self) {
        self.drop_filter = None;
    }

    /// Send the controller's connect and deliver whatever follows at the
    /// current instant.
    pub fn connect(&mut self) {
        self.controller.connect(self.now, &mut self.controller_out);
        self.pump();
    }

    /// Connect and run until the controller has the full initial state.
    pub fn connect_and_initialize(&mut self) {
        self.connect();
        assert!(
            self.run_until_initialized(Duration::from_secs(2)),
            "controller never initialized; events: {:?}",
            self.controller_events
        );
    }

    /// Deliver queued datagrams until both sides go quiet.
    pub fn pump(&mut self) {
        loop {
            let to_device = self.controller_out.drain();
            let to_controller = self.device_out.drain();
            if to_device.is_empty() && to_controller.is_empty() {
                break;
            }
            for (_, raw) in to_device {
                self.carry(Direction::ToDevice, raw);
            }
            for (_, raw) in to_controller {
                self.carry(Direction::ToController, raw);
            }
        }
        self.collect_events();
    }

    fn carry(&mut self, direction: Direction, raw: Bytes) {
        let packet = packet::decode(&raw).expect("roles only emit valid packets");
        let mut datagram = Datagram {
            direction,
            raw: raw.clone(),
            packet,
            dropped: false,
        };
        if let Some(filter) = self.drop_filter.as_mut() {
            datagram.dropped = filter(&datagram);
        }
        let dropped = datagram.dropped;
        self.wire.push(datagram);
        if dropped {
            return;
        }
        match direction {
            Direction::ToDevice => self.device.handle_datagram(
                &raw,
                controller_addr(),
                self.now,
                &mut self.device_out,
            ),
            Direction::ToController => self.controller.handle_datagram(
                &raw,
                device_addr(),
                self.now,
                &mut self.controller_out,
            ),
        }
    }

    /// Run both roles' timers due at the current instant.
    pub fn tick(&mut self) {
        self.controller
            .handle_timeout(self.now, &mut self.controller_out);
        self.device.handle_timeout(self.now, &mut self.device_out);
        self.pump();
    }

    fn next_deadline(&self) -> Option<Instant> {
        [self.controller.poll_timeout(), self.device.poll_timeout()]
            .into_iter()
            .flatten()
            .min()
    }

    /// Advance the clock by `duration`, firing every deadline on the way.
    pub fn run_for(&mut self, duration: Duration) {
        let end = self.now + duration;
        self.pump();
        while let Some(at) = self.next_deadline().filter(|at| *at <= end) {
            self.now = self.now.max(at);
            self.tick();
        }
        self.now = end;
    }

    /// Step through deadlines until `Initialized` arrives or `limit` passes.
    pub fn run_until_initialized(&mut self, limit: Duration) -> bool {
        let end = self.now + limit;
        self.pump();
        loop {
            if self.initialized() {
                return true;
            }
            match self.next_deadline() {
                Some(at) if at <= end => {
                    self.now = self.now.max(at);
                    self.tick();
                }
                _ => return self.initialized(),
            }
        }
    }

    pub fn initialized(&self) -> bool {
        self.controller_events
            .iter()
            .any(|e| matches!(e, RoleEvent::Initialized { .. }))
    }

    /// Hand the controller a raw datagram as if the device sent it.
    pub fn inject_to_controller(&mut self, raw: &[u8]) {
        self.controller
            .handle_datagram(raw, device_addr(), self.now, &mut self.controller_out);
        self.pump();
    }

    fn collect_events(&mut self) {
        while let Some(event) = self.controller.poll_event() {
            self.controller_events.push(event);
        }
        while let Some(event) = self.device.poll_event() {
            self.device_events.push(event);
        }
    }

    /// Datagrams that actually crossed the link in one direction.
    pub fn delivered(&self, direction: Direction) -> Vec<&Datagram> {
        self.wire
            .iter()
            .filter(|d| d.direction == direction && !d.dropped)
            .collect()
    }

    /// Every datagram sent in one direction, dropped or not.
    pub fn sent(&self, direction: Direction) -> Vec<&Datagram> {
        self.wire
            .iter()
            .filter(|d| d.direction == direction)
            .collect()
    }
}
