//! Connection handshake between controller and device.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use atem_protocol::{packet, Packet, PacketFlags, SwitcherState};
use atem_session::session::CONNECT_REQUEST;
use atem_session::{
    DeviceRole, MemoryTransport, ProtocolRole, RoleEvent, SessionConfig, SessionError,
    SessionState,
};
use bytes::Bytes;

use crate::harness::{controller_addr, registry, Direction, TestLink};

fn connect_datagram() -> Bytes {
    packet::encode(&Packet {
        flags: PacketFlags::CONNECT,
        session_id: 0,
        acknowledgement: 0,
        number: 0,
        payload: Bytes::from_static(&CONNECT_REQUEST),
    })
    .unwrap()
}

#[test]
fn test_handshake_sequence() {
    let mut link = TestLink::new(SwitcherState::simulated(4, 1));
    link.connect();

    let connect = link.sent(Direction::ToDevice)[0].clone();
    assert!(connect.packet.is_connect());
    assert_eq!(connect.packet.session_id, 0);
    assert_eq!(connect.packet.number, 0);
    assert_eq!(connect.raw.len(), 20);

    let reply = link.sent(Direction::ToController)[0].clone();
    assert!(reply.packet.is_connect());
    assert_ne!(reply.packet.session_id, 0);
    assert_eq!(&reply.raw[12..14], &[0x02, 0x00]);

    // Controller considers itself connected; the device waits for the ack.
    assert!(link.controller.is_established());
    let session = link.device.session(&controller_addr()).unwrap();
    assert_eq!(session.state(), SessionState::HandshakeReceived);
    assert_eq!(link.sent(Direction::ToDevice).len(), 1);

    link.tick();
    let ack = link.sent(Direction::ToDevice)[1].clone();
    assert_eq!(ack.packet.flags, PacketFlags::ACK);
    assert_eq!(ack.packet.acknowledgement, 0);
    assert_eq!(ack.packet.session_id, reply.packet.session_id);

    let session = link.device.session(&controller_addr()).unwrap();
    assert_eq!(session.state(), SessionState::Established);
    assert!(link.controller_events.iter().any(|e| matches!(
        e,
        RoleEvent::Connected { session_id, .. } if *session_id == reply.packet.session_id
    )));
    assert!(link
        .device_events
        .iter()
        .any(|e| matches!(e, RoleEvent::Connected { .. })));
}

#[test]
fn test_no_data_before_handshake_ack() {
    let mut link = TestLink::new(SwitcherState::simulated(4, 1));
    link.connect();
    assert!(!link
        .sent(Direction::ToController)
        .iter()
        .any(|d| d.is_data()));
}

#[test]
fn test_unanswered_connect_times_out() {
    let mut link = TestLink::new(SwitcherState::simulated(4, 1));
    link.set_drop_filter(|d| d.direction == Direction::ToDevice);
    link.connect();
    link.run_for(Duration::from_secs(1));

    let attempts = link.sent(Direction::ToDevice);
    assert_eq!(attempts.len(), SessionConfig::default().handshake_max_attempts as usize);
    assert!(!attempts[0].packet.is_repeated());
    assert!(attempts[1..]
        .iter()
        .all(|d| d.packet.is_connect() && d.packet.is_repeated()));
    assert!(link.controller_events.iter().any(|e| matches!(
        e,
        RoleEvent::Disconnected {
            error: Some(SessionError::ConnectionTimeout { .. }),
            ..
        }
    )));
    assert!(!link.controller.is_established());
    assert_eq!(link.device.session_count(), 0);
}

#[test]
fn test_lost_handshake_ack_recovers() {
    let mut link = TestLink::new(SwitcherState::simulated(4, 1));
    let mut dropped = false;
    link.set_drop_filter(move |d| {
        let first_ack = d.direction == Direction::ToDevice && d.packet.flags == PacketFlags::ACK;
        if first_ack && !dropped {
            dropped = true;
            return true;
        }
        false
    });
    link.connect_and_initialize();

    let replies: Vec<_> = link
        .sent(Direction::ToController)
        .into_iter()
        .filter(|d| d.packet.is_connect())
        .collect();
    assert!(replies.len() >= 2);
    assert!(replies[1].packet.is_repeated());
    assert_eq!(replies[0].packet.session_id, replies[1].packet.session_id);
    assert_eq!(link.controller.state(), link.device.state());
}

#[test]
fn test_session_ids_unique_and_nonzero() {
    let mut device = DeviceRole::new(
        SwitcherState::simulated(2, 1),
        registry(),
        SessionConfig::default(),
    );
    let mut transport = MemoryTransport::new();
    let now = Instant::now();
    let connect = connect_datagram();
    for port in 0..8u16 {
        let from = SocketAddr::from(([10, 0, 0, 1], 50000 + port));
        device.handle_datagram(&connect, from, now, &mut transport);
    }

    let ids: HashSet<u16> = transport
        .packets()
        .iter()
        .map(|(_, p)| p.session_id)
        .collect();
    assert_eq!(ids.len(), 8);
    assert!(ids.iter().all(|id| (1..=0x7fff).contains(id)));
    assert_eq!(device.session_count(), 8);
}

#[test]
fn test_reconnect_replaces_session() {
    let mut link = TestLink::new(SwitcherState::simulated(4, 1));
    link.connect_and_initialize();

    link.controller_events.clear();
    link.connect_and_initialize();

    assert_eq!(link.device.session_count(), 1);
    assert!(link.device_events.iter().any(|e| matches!(
        e,
        RoleEvent::Disconnected { error: None, .. }
    )));
    let session = link.device.session(&controller_addr()).unwrap();
    assert_eq!(session.state(), SessionState::Established);
    let controller_session = link.controller.session().unwrap();
    assert_eq!(controller_session.session_id(), session.session_id());
}

#[test]
fn test_controller_ignores_other_addresses() {
    let mut link = TestLink::new(SwitcherState::simulated(2, 1));
    link.connect_and_initialize();
    let before = link.controller.state().clone();

    let mut transport = MemoryTransport::new();
    let stranger: SocketAddr = "192.168.10.99:9910".parse().unwrap();
    let reply = link.sent(Direction::ToController)[0].raw.clone();
    link.controller
        .handle_datagram(&reply, stranger, link.now, &mut transport);

    assert!(transport.sent.is_empty());
    assert!(link.controller.is_established());
    assert_eq!(link.controller.state(), &before);
}
