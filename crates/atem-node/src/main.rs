//! ATEM Node -- switcher control over UDP.
//!
//! Usage:
//!   atem-node connect [ADDR]           # Mirror a switcher, print every message
//!   atem-node connect --json           # Same, one JSON object per line
//!   atem-node connect --program 3      # Cut input 3 to program once connected
//!   atem-node simulate                 # Serve a simulated switcher
//!   atem-node --config path.toml ...   # Custom config

use std::net::SocketAddr;
use std::sync::Arc;

use atem_node::config::{self, NodeConfig};
use atem_node::expand_tilde;
use atem_node::udp_task::{self, RoleCommand};

use atem_protocol::{ChangeProgramBus, Message, MessageRegistry, SwitcherState, VideoSource};
use atem_session::{ControllerRole, DeviceRole, ProtocolRole, RoleEvent};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "atem-node", about = "ATEM switcher control node")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.atem/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a switcher as a controller
    Connect {
        /// Switcher address, "host" or "host:port" (default from config)
        addr: Option<String>,
        /// Print messages as JSON lines
        #[arg(long)]
        json: bool,
        /// Source id to put on program once the initial state is in
        #[arg(long)]
        program: Option<u16>,
        /// Mix-effect block for --program
        #[arg(long, default_value_t = 0)]
        me: u8,
    },
    /// Run a simulated switcher
    Simulate {
        /// Listen address (default from config)
        #[arg(long)]
        listen: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atem_node=info,atem_session=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let cfg = NodeConfig::load_or_default(&config_path)?;

    match cli.command {
        Commands::Connect {
            addr,
            json,
            program,
            me,
        } => {
            let device = config::parse_device_addr(addr.as_deref().unwrap_or(&cfg.node.device_addr))?;
            let program = match program {
                Some(id) => Some(
                    VideoSource::from_id(id)
                        .ok_or_else(|| anyhow::anyhow!("unknown source id {id}"))?,
                ),
                None => None,
            };
            run_controller(&cfg, device, json, program.map(|source| (me, source))).await?;
        }
        Commands::Simulate { listen } => {
            let listen = listen.unwrap_or_else(|| cfg.simulator.listen_addr.clone());
            run_simulator(&cfg, listen.parse()?).await?;
        }
    }

    Ok(())
}

async fn run_controller(
    cfg: &NodeConfig,
    device: SocketAddr,
    json: bool,
    program: Option<(u8, VideoSource)>,
) -> anyhow::Result<()> {
    let registry = Arc::new(MessageRegistry::standard()?);
    let mut role = ControllerRole::new(device, registry, cfg.session.session_config());

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<Message>();
    role.subscribers_mut().on_any(move |message| {
        msg_tx.send(message.clone())?;
        Ok(())
    });

    tracing::info!(
        %device,
        version = env!("CARGO_PKG_VERSION"),
        "starting atem-node controller"
    );
    let mut handle = udp_task::spawn_role(cfg.node.bind_addr.parse()?, role).await?;
    handle.command(RoleCommand::Connect).await?;

    loop {
        tokio::select! {
            Some(message) = msg_rx.recv() => {
                if json {
                    println!("{}", serde_json::to_string(&message)?);
                } else {
                    println!("{} {:?}", message.tag(), message);
                }
            }
            event = handle.next_event() => {
                let Some(event) = event else { break };
                match event {
                    RoleEvent::Connected { session_id, .. } => {
                        tracing::info!(%device, session_id, "connected");
                    }
                    RoleEvent::Initialized { .. } => {
                        tracing::info!(%device, "initial state received");
                        if let Some((mix_effect, source)) = program {
                            let command = ChangeProgramBus { mix_effect, source };
                            handle.command(RoleCommand::Send(vec![command.into()])).await?;
                        }
                    }
                    RoleEvent::Disconnected { error: Some(e), .. } => {
                        anyhow::bail!("lost connection to {device}: {e}");
                    }
                    RoleEvent::Disconnected { error: None, .. } => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    let role = handle.shutdown().await?;
    tracing::info!(sources = role.state().sources.len(), "controller stopped");
    Ok(())
}

async fn run_simulator(cfg: &NodeConfig, listen: SocketAddr) -> anyhow::Result<()> {
    let registry = Arc::new(MessageRegistry::standard()?);
    let state = SwitcherState::simulated(cfg.simulator.inputs, cfg.simulator.mix_effects);
    let mut role = DeviceRole::new(state, registry, cfg.session.session_config());
    role.subscribers_mut().on_any(|message| {
        tracing::info!(tag = %message.tag(), ?message, "simulator: received");
        Ok(())
    });

    tracing::info!(
        %listen,
        inputs = cfg.simulator.inputs,
        mix_effects = cfg.simulator.mix_effects,
        version = env!("CARGO_PKG_VERSION"),
        "starting atem-node simulator"
    );
    let mut handle = udp_task::spawn_role(listen, role).await?;

    loop {
        tokio::select! {
            event = handle.next_event() => {
                let Some(event) = event else { break };
                match event {
                    RoleEvent::Connected { peer, session_id } => {
                        tracing::info!(%peer, session_id, "controller connected");
                    }
                    RoleEvent::Initialized { .. } => {}
                    RoleEvent::Disconnected { peer, error } => match error {
                        Some(e) => tracing::warn!(%peer, error = %e, "controller lost"),
                        None => tracing::info!(%peer, "controller disconnected"),
                    },
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}
