//! UDP driver -- one socket, one protocol role, one task.
//!
//! Each loop iteration waits on:
//!   1. an inbound datagram -> role.handle_datagram()
//!   2. the role's next deadline -> role.handle_timeout()
//!   3. a command from the owner -> connect / send / close
//!   4. shutdown
//!
//! Role events are forwarded to the owner after every step.

use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use atem_protocol::{Message, MAX_PACKET_LEN};
use atem_session::{ControllerRole, DeviceRole, ProtocolRole, RoleEvent, Transport};
use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const COMMAND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

// ============================================================================
// Commands (inbound to the role task)
// ============================================================================

#[derive(Debug)]
pub enum RoleCommand {
    /// Open (or reopen) the handshake. Controller only.
    Connect,
    /// Controller: commands for the device. Device: changes to broadcast.
    Send(Vec<Message>),
    /// Close every session the role holds.
    Close,
}

/// A role the driver can steer with [`RoleCommand`]s.
pub trait DrivenRole: ProtocolRole + Send + 'static {
    fn handle_command(&mut self, command: RoleCommand, now: Instant, transport: &mut dyn Transport);
}

impl DrivenRole for ControllerRole {
    fn handle_command(&mut self, command: RoleCommand, now: Instant, transport: &mut dyn Transport) {
        match command {
            RoleCommand::Connect => self.connect(now, transport),
            RoleCommand::Send(messages) => {
                if let Err(e) = self.send(&messages, now) {
                    tracing::warn!(device = %self.device(), error = %e, "udp: send failed");
                }
            }
            RoleCommand::Close => self.close(),
        }
    }
}

impl DrivenRole for DeviceRole {
    fn handle_command(&mut self, command: RoleCommand, now: Instant, _transport: &mut dyn Transport) {
        match command {
            RoleCommand::Connect => {
                tracing::debug!("udp: device ignores connect command");
            }
            RoleCommand::Send(messages) => {
                for message in messages {
                    self.publish(message, now);
                }
            }
            RoleCommand::Close => self.close_all(),
        }
    }
}

/// Sends straight from the task's socket. A full send buffer drops the
/// datagram; the session layer retransmits.
struct SocketTransport<'a> {
    socket: &'a UdpSocket,
}

impl Transport for SocketTransport<'_> {
    fn send(&mut self, datagram: Bytes, to: SocketAddr) -> io::Result<()> {
        self.socket.try_send_to(&datagram, to).map(|_| ())
    }
}

/// Run the role loop until shutdown or until the command channel closes.
/// Returns the role so its final state can be inspected.
pub async fn run_role_loop<R: DrivenRole>(
    socket: UdpSocket,
    mut role: R,
    mut cmd_rx: mpsc::Receiver<RoleCommand>,
    event_tx: mpsc::Sender<RoleEvent>,
    mut shutdown: broadcast::Receiver<()>,
) -> R {
    // One spare byte so an oversized datagram fails the length check.
    let mut buf = BytesMut::with_capacity(MAX_PACKET_LEN + 1);

    loop {
        let deadline = role.poll_timeout();
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            received = socket.recv_buf_from(&mut buf) => {
                match received {
                    Ok((_, from)) => {
                        let mut transport = SocketTransport { socket: &socket };
                        role.handle_datagram(&buf, from, Instant::now(), &mut transport);
                    }
                    Err(e) => tracing::debug!(error = %e, "udp: receive failed"),
                }
                buf.clear();
                buf.reserve(MAX_PACKET_LEN + 1);
            }

            _ = timer => {
                let mut transport = SocketTransport { socket: &socket };
                role.handle_timeout(Instant::now(), &mut transport);
            }

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                let mut transport = SocketTransport { socket: &socket };
                role.handle_command(cmd, Instant::now(), &mut transport);
            }

            _ = shutdown.recv() => {
                let mut transport = SocketTransport { socket: &socket };
                role.handle_command(RoleCommand::Close, Instant::now(), &mut transport);
                forward_events(&mut role, &event_tx).await;
                tracing::info!("udp: role task shutting down");
                break;
            }
        }

        forward_events(&mut role, &event_tx).await;
    }
    role
}

async fn forward_events<R: ProtocolRole>(role: &mut R, event_tx: &mpsc::Sender<RoleEvent>) {
    while let Some(event) = role.poll_event() {
        if event_tx.send(event).await.is_err() {
            tracing::trace!("udp: event receiver gone");
        }
    }
}

/// A role running on its own task.
pub struct RoleHandle<R> {
    pub local_addr: SocketAddr,
    pub commands: mpsc::Sender<RoleCommand>,
    pub events: mpsc::Receiver<RoleEvent>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<R>,
}

impl<R: DrivenRole> RoleHandle<R> {
    pub async fn command(&self, command: RoleCommand) -> anyhow::Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("role task has stopped"))
    }

    /// Wait for the next event.
    pub async fn next_event(&mut self) -> Option<RoleEvent> {
        self.events.recv().await
    }

    /// Close sessions, stop the task and hand back the role.
    pub async fn shutdown(self) -> anyhow::Result<R> {
        if self.shutdown_tx.send(()).is_err() {
            tracing::trace!("udp: role task already stopped");
        }
        Ok(self.task.await?)
    }
}

/// Bind `bind_addr` and run `role` on a new task.
pub async fn spawn_role<R: DrivenRole>(bind_addr: SocketAddr, role: R) -> io::Result<RoleHandle<R>> {
    let socket = UdpSocket::bind(bind_addr).await?;
    let local_addr = socket.local_addr()?;
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    tracing::info!(%local_addr, "udp: socket bound");
    let task = tokio::spawn(run_role_loop(socket, role, cmd_rx, event_tx, shutdown_rx));
    Ok(RoleHandle {
        local_addr,
        commands: cmd_tx,
        events: event_rx,
        shutdown_tx,
        task,
    })
}
