//! Initial state dump, commands and broadcasts.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use atem_protocol::{
    ChangePreviewBus, ChangeProgramBus, InitiationComplete, Message, PreviewBusChanged,
    ProgramBusChanged, SwitcherState, VideoSource, VideoSourcePropertiesChanged,
};
use atem_session::{
    ControllerRole, DeviceRole, MemoryTransport, ProtocolRole, RoleEvent, SessionConfig,
    SessionError,
};

use crate::harness::{device_addr, registry, Direction, TestLink};

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    (count.clone(), count)
}

#[test]
fn test_initial_state_streamed_in_order() {
    let state = SwitcherState::simulated(40, 2);
    let mut link = TestLink::new(state.clone());
    link.connect_and_initialize();

    let data: Vec<_> = link
        .delivered(Direction::ToController)
        .into_iter()
        .filter(|d| d.is_data())
        .cloned()
        .collect();
    assert!(data.len() >= 2, "dump should span several packets");
    for (i, datagram) in data.iter().enumerate() {
        assert_eq!(datagram.packet.number as usize, i + 1);
        assert!(!datagram.packet.is_repeated());
        assert!(datagram.raw.len() <= SessionConfig::default().max_packet_size);
    }

    let registry = registry();
    let received: Vec<Message> = data
        .iter()
        .flat_map(|d| d.packet.messages().unwrap())
        .map(|frame| registry.dispatch(frame.tag, &frame.body).unwrap())
        .collect();
    assert_eq!(received, state.to_messages());
    assert_eq!(link.controller.state(), &state);
}

#[test]
fn test_subscribers_see_every_message() {
    let state = SwitcherState::simulated(40, 2);
    let mut link = TestLink::new(state.clone());

    let (sources, seen_sources) = counter();
    let (all, seen_all) = counter();
    let (done, seen_done) = counter();
    let subscribers = link.controller.subscribers_mut();
    subscribers.on::<VideoSourcePropertiesChanged, _>(move |_| {
        sources.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    subscribers.on::<InitiationComplete, _>(move |_| {
        done.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    subscribers.on_any(move |_| {
        all.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    link.connect_and_initialize();

    assert_eq!(seen_sources.load(Ordering::SeqCst), state.sources.len());
    assert_eq!(seen_done.load(Ordering::SeqCst), 1);
    assert_eq!(seen_all.load(Ordering::SeqCst), state.to_messages().len());
}

#[test]
fn test_program_command_round_trip() {
    let mut link = TestLink::new(SwitcherState::simulated(8, 2));
    link.connect_and_initialize();

    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    link.controller
        .subscribers_mut()
        .on::<ProgramBusChanged, _>(move |m| {
            sink.lock().unwrap().push(*m);
            Ok(())
        });

    let command = ChangeProgramBus {
        mix_effect: 1,
        source: VideoSource::Input(5),
    };
    link.controller.send(&[command.into()], link.now).unwrap();
    link.run_for(Duration::from_millis(50));

    assert_eq!(link.device.state().program[&1], VideoSource::Input(5));
    assert_eq!(link.controller.state().program[&1], VideoSource::Input(5));
    assert_eq!(link.controller.state(), link.device.state());
    assert_eq!(
        *changes.lock().unwrap(),
        vec![ProgramBusChanged {
            mix_effect: 1,
            source: VideoSource::Input(5),
        }]
    );
}

#[test]
fn test_preview_command_round_trip() {
    let mut link = TestLink::new(SwitcherState::simulated(8, 1));
    link.connect_and_initialize();

    let command = ChangePreviewBus {
        mix_effect: 0,
        source: VideoSource::ColorBars,
    };
    link.controller.send(&[command.into()], link.now).unwrap();
    link.run_for(Duration::from_millis(50));

    assert_eq!(link.device.state().preview[&0], VideoSource::ColorBars);
    assert_eq!(link.controller.state().preview[&0], VideoSource::ColorBars);
}

#[test]
fn test_inapplicable_command_changes_nothing() {
    let state = SwitcherState::simulated(4, 1);
    let mut link = TestLink::new(state.clone());
    link.connect_and_initialize();
    let before = link.delivered(Direction::ToController).len();

    let commands: Vec<Message> = vec![
        ChangeProgramBus {
            mix_effect: 3,
            source: VideoSource::Input(0),
        }
        .into(),
        ChangeProgramBus {
            mix_effect: 0,
            source: VideoSource::Input(30),
        }
        .into(),
    ];
    link.controller.send(&commands, link.now).unwrap();
    link.run_for(Duration::from_millis(50));

    assert_eq!(link.device.state(), &state);
    assert!(!link.delivered(Direction::ToController)[before..]
        .iter()
        .any(|d| d.is_data()));
}

#[test]
fn test_device_publish_reaches_controller() {
    let mut link = TestLink::new(SwitcherState::simulated(4, 1));
    link.connect_and_initialize();

    let change = PreviewBusChanged {
        mix_effect: 0,
        source: VideoSource::Color(1),
    };
    link.device.publish(change.into(), link.now);
    link.run_for(Duration::from_millis(50));

    assert_eq!(link.device.state().preview[&0], VideoSource::Color(1));
    assert_eq!(link.controller.state(), link.device.state());
}

#[test]
fn test_send_before_connect_fails() {
    let mut controller = ControllerRole::new(device_addr(), registry(), SessionConfig::default());
    let command = ChangeProgramBus {
        mix_effect: 0,
        source: VideoSource::Black,
    };
    assert!(controller.send(&[command.into()], Instant::now()).is_err());
}

/// Two controllers on one device, routed by hand.
struct Studio {
    device: DeviceRole,
    device_out: MemoryTransport,
    controllers: Vec<(SocketAddr, ControllerRole, MemoryTransport)>,
    now: Instant,
}

impl Studio {
    fn new(state: SwitcherState, count: u16) -> Self {
        let registry = registry();
        let config = SessionConfig::default();
        let controllers = (0..count)
            .map(|i| {
                let addr = SocketAddr::from(([192, 168, 10, 60 + i as u8], 50000 + i));
                let role = ControllerRole::new(device_addr(), registry.clone(), config);
                (addr, role, MemoryTransport::new())
            })
            .collect();
        Self {
            device: DeviceRole::new(state, registry, config),
            device_out: MemoryTransport::new(),
            controllers,
            now: Instant::now(),
        }
    }

    fn pump(&mut self) {
        loop {
            let mut moved = false;
            for (addr, _, out) in self.controllers.iter_mut() {
                for (_, raw) in out.drain() {
                    moved = true;
                    self.device
                        .handle_datagram(&raw, *addr, self.now, &mut self.device_out);
                }
            }
            let by_addr: HashMap<SocketAddr, usize> = self
                .controllers
                .iter()
                .enumerate()
                .map(|(i, (addr, _, _))| (*addr, i))
                .collect();
            for (to, raw) in self.device_out.drain() {
                moved = true;
                if let Some(&i) = by_addr.get(&to) {
                    let (_, controller, out) = &mut self.controllers[i];
                    controller.handle_datagram(&raw, device_addr(), self.now, out);
                }
            }
            if !moved {
                break;
            }
        }
    }

    fn run_for(&mut self, duration: Duration) {
        let end = self.now + duration;
        self.pump();
        loop {
            let next = self
                .controllers
                .iter()
                .filter_map(|(_, c, _)| c.poll_timeout())
                .chain(self.device.poll_timeout())
                .min();
            match next {
                Some(at) if at <= end => {
                    self.now = self.now.max(at);
                    for (_, controller, out) in self.controllers.iter_mut() {
                        controller.handle_timeout(self.now, out);
                    }
                    self.device.handle_timeout(self.now, &mut self.device_out);
                    self.pump();
                }
                _ => break,
            }
        }
        self.now = end;
    }
}

#[test]
fn test_change_broadcast_to_every_controller() {
    let state = SwitcherState::simulated(6, 1);
    let mut studio = Studio::new(state, 2);
    for (_, controller, out) in studio.controllers.iter_mut() {
        controller.connect(studio.now, out);
    }
    studio.run_for(Duration::from_millis(500));

    for (_, controller, _) in studio.controllers.iter_mut() {
        assert!(controller.state().initialized);
        let mut initialized = false;
        while let Some(event) = controller.poll_event() {
            initialized |= matches!(event, RoleEvent::Initialized { .. });
        }
        assert!(initialized);
    }
    assert_eq!(studio.device.session_count(), 2);

    let command = ChangeProgramBus {
        mix_effect: 0,
        source: VideoSource::Input(4),
    };
    let now = studio.now;
    studio.controllers[0].1.send(&[command.into()], now).unwrap();
    studio.run_for(Duration::from_millis(50));

    for (_, controller, _) in &studio.controllers {
        assert_eq!(controller.state().program[&0], VideoSource::Input(4));
        assert_eq!(controller.state(), studio.device.state());
    }
}

#[test]
fn test_unencodable_state_fails_session_instead_of_partial_dump() {
    let mut state = SwitcherState::simulated(4, 1);
    if let Some(props) = state.sources.get_mut(&VideoSource::Input(2)) {
        props.short_name = "Cam3x".into();
    }
    let mut link = TestLink::new(state);
    link.connect();
    assert!(!link.run_until_initialized(Duration::from_secs(1)));

    assert!(!link
        .sent(Direction::ToController)
        .iter()
        .any(|d| d.is_data()));
    assert_eq!(link.device.session_count(), 0);
    assert!(link.device_events.iter().any(|e| matches!(
        e,
        RoleEvent::Disconnected {
            error: Some(SessionError::Protocol(_)),
            ..
        }
    )));
    assert!(link.controller.state().sources.is_empty());
}
