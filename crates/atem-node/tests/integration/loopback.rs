//! Controller and simulated device on 127.0.0.1.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use atem_node::config::NodeConfig;
use atem_node::udp_task::{self, RoleCommand, RoleHandle};
use atem_protocol::{ChangeProgramBus, MessageRegistry, SwitcherState, VideoSource};
use atem_session::{ControllerRole, DeviceRole, ProtocolRole, RoleEvent};

const WAIT: Duration = Duration::from_secs(5);

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn start_device(state: SwitcherState) -> RoleHandle<DeviceRole> {
    let cfg = NodeConfig::default();
    let registry = Arc::new(MessageRegistry::standard().unwrap());
    let role = DeviceRole::new(state, registry, cfg.session.session_config());
    udp_task::spawn_role(loopback(), role).await.unwrap()
}

async fn start_controller(device: SocketAddr) -> RoleHandle<ControllerRole> {
    let cfg = NodeConfig::default();
    let registry = Arc::new(MessageRegistry::standard().unwrap());
    let role = ControllerRole::new(device, registry, cfg.session.session_config());
    let handle = udp_task::spawn_role(loopback(), role).await.unwrap();
    handle.command(RoleCommand::Connect).await.unwrap();
    handle
}

/// Wait for the first event matching `pred`.
async fn wait_for<R>(handle: &mut RoleHandle<R>, pred: impl Fn(&RoleEvent) -> bool) -> RoleEvent
where
    R: udp_task::DrivenRole,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match handle.next_event().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("role task stopped"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_controller_mirrors_simulated_device() {
    let state = SwitcherState::simulated(20, 2);
    let mut device = start_device(state.clone()).await;
    let mut controller = start_controller(device.local_addr).await;

    wait_for(&mut controller, |e| matches!(e, RoleEvent::Initialized { .. })).await;
    let event = wait_for(&mut device, |e| matches!(e, RoleEvent::Connected { .. })).await;
    let RoleEvent::Connected { peer, .. } = event else {
        unreachable!()
    };
    assert_eq!(peer, controller.local_addr);

    let controller = controller.shutdown().await.unwrap();
    assert_eq!(controller.state(), &state);
    device.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_command_round_trip_over_udp() {
    let device = start_device(SwitcherState::simulated(8, 1)).await;
    let mut controller = start_controller(device.local_addr).await;
    wait_for(&mut controller, |e| matches!(e, RoleEvent::Initialized { .. })).await;

    let command = ChangeProgramBus {
        mix_effect: 0,
        source: VideoSource::Input(6),
    };
    controller
        .command(RoleCommand::Send(vec![command.into()]))
        .await
        .unwrap();
    // Let the change travel to the device and back.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let controller = controller.shutdown().await.unwrap();
    let device = device.shutdown().await.unwrap();
    assert_eq!(device.state().program[&0], VideoSource::Input(6));
    assert_eq!(controller.state().program[&0], VideoSource::Input(6));
}

#[tokio::test]
async fn test_shutdown_disconnects_controller() {
    let device = start_device(SwitcherState::simulated(4, 1)).await;
    let mut controller = start_controller(device.local_addr).await;
    wait_for(&mut controller, |e| matches!(e, RoleEvent::Initialized { .. })).await;

    controller.command(RoleCommand::Close).await.unwrap();
    let event = wait_for(&mut controller, |e| matches!(e, RoleEvent::Disconnected { .. })).await;
    assert!(matches!(event, RoleEvent::Disconnected { error: None, .. }));

    controller.shutdown().await.unwrap();
    device.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_device_times_out() {
    // Bind and drop a socket to find a port nobody answers on.
    let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = silent.local_addr().unwrap();
    drop(silent);

    let mut controller = start_controller(addr).await;
    let event = wait_for(&mut controller, |e| matches!(e, RoleEvent::Disconnected { .. })).await;
    assert!(matches!(
        event,
        RoleEvent::Disconnected {
            error: Some(atem_session::SessionError::ConnectionTimeout { .. }),
            ..
        }
    ));
    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_after_task_stopped() {
    let mut device = start_device(SwitcherState::simulated(4, 1)).await;

    // Dropping the only command sender ends the loop on its own.
    let (detached, _) = tokio::sync::mpsc::channel(1);
    drop(std::mem::replace(&mut device.commands, detached));
    let last = tokio::time::timeout(WAIT, device.next_event())
        .await
        .expect("role task kept running");
    assert!(last.is_none());

    let role = device.shutdown().await.unwrap();
    assert_eq!(role.session_count(), 0);
    assert_eq!(role.state(), &SwitcherState::simulated(4, 1));
}
