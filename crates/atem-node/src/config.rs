//! Configuration types for atem-node.
//! Parsed from ~/.atem/config.toml.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use atem_protocol::{
    ProtocolTiming, DEFAULT_TIMING, MAX_SIMULATED_INPUTS, MAX_SIMULATED_MIX_EFFECTS,
};
use atem_session::SessionConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub simulator: SimulatorSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Local address the controller binds to. Port 0 picks any free port.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Switcher to connect to when none is given on the command line.
    #[serde(default = "default_device_addr")]
    pub device_addr: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            device_addr: default_device_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_handshake_retry_interval_ms")]
    pub handshake_retry_interval_ms: u64,
    #[serde(default = "default_handshake_max_attempts")]
    pub handshake_max_attempts: u32,
    #[serde(default = "default_ack_delay_ms")]
    pub ack_delay_ms: u64,
    #[serde(default = "default_retransmit_interval_ms")]
    pub retransmit_interval_ms: u64,
    #[serde(default = "default_max_retransmits")]
    pub max_retransmits: u32,
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    #[serde(default = "default_reorder_window")]
    pub reorder_window: u16,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self::from(&DEFAULT_TIMING)
    }
}

impl From<&ProtocolTiming> for SessionSection {
    fn from(t: &ProtocolTiming) -> Self {
        Self {
            handshake_retry_interval_ms: t.handshake_retry_interval_ms,
            handshake_max_attempts: t.handshake_max_attempts,
            ack_delay_ms: t.ack_delay_ms,
            retransmit_interval_ms: t.retransmit_interval_ms,
            max_retransmits: t.max_retransmits,
            keepalive_interval_ms: t.keepalive_interval_ms,
            inactivity_timeout_ms: t.inactivity_timeout_ms,
            max_packet_size: t.max_packet_size,
            reorder_window: t.reorder_window,
        }
    }
}

impl SessionSection {
    pub fn timing(&self) -> ProtocolTiming {
        ProtocolTiming {
            handshake_retry_interval_ms: self.handshake_retry_interval_ms,
            handshake_max_attempts: self.handshake_max_attempts,
            ack_delay_ms: self.ack_delay_ms,
            retransmit_interval_ms: self.retransmit_interval_ms,
            max_retransmits: self.max_retransmits,
            keepalive_interval_ms: self.keepalive_interval_ms,
            inactivity_timeout_ms: self.inactivity_timeout_ms,
            max_packet_size: self.max_packet_size,
            reorder_window: self.reorder_window,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::from(&self.timing())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorSection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_inputs")]
    pub inputs: u16,
    #[serde(default = "default_mix_effects")]
    pub mix_effects: u8,
}

impl Default for SimulatorSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            inputs: default_inputs(),
            mix_effects: default_mix_effects(),
        }
    }
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:0".into()
}
fn default_device_addr() -> String {
    format!("10.1.0.100:{}", atem_protocol::DEFAULT_PORT)
}
fn default_listen_addr() -> String {
    format!("0.0.0.0:{}", atem_protocol::DEFAULT_PORT)
}
fn default_inputs() -> u16 {
    8
}
fn default_mix_effects() -> u8 {
    1
}
fn default_handshake_retry_interval_ms() -> u64 {
    DEFAULT_TIMING.handshake_retry_interval_ms
}
fn default_handshake_max_attempts() -> u32 {
    DEFAULT_TIMING.handshake_max_attempts
}
fn default_ack_delay_ms() -> u64 {
    DEFAULT_TIMING.ack_delay_ms
}
fn default_retransmit_interval_ms() -> u64 {
    DEFAULT_TIMING.retransmit_interval_ms
}
fn default_max_retransmits() -> u32 {
    DEFAULT_TIMING.max_retransmits
}
fn default_keepalive_interval_ms() -> u64 {
    DEFAULT_TIMING.keepalive_interval_ms
}
fn default_inactivity_timeout_ms() -> u64 {
    DEFAULT_TIMING.inactivity_timeout_ms
}
fn default_max_packet_size() -> usize {
    DEFAULT_TIMING.max_packet_size
}
fn default_reorder_window() -> u16 {
    DEFAULT_TIMING.reorder_window
}

impl NodeConfig {
    /// Load config from file, or use defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values the simulated switcher cannot put on the wire.
    pub fn validate(&self) -> anyhow::Result<()> {
        let sim = &self.simulator;
        if !(1..=MAX_SIMULATED_MIX_EFFECTS).contains(&sim.mix_effects) {
            anyhow::bail!(
                "simulator.mix_effects = {}: must be between 1 and {MAX_SIMULATED_MIX_EFFECTS}",
                sim.mix_effects
            );
        }
        if sim.inputs > MAX_SIMULATED_INPUTS {
            anyhow::bail!(
                "simulator.inputs = {}: at most {MAX_SIMULATED_INPUTS}",
                sim.inputs
            );
        }
        Ok(())
    }
}

/// Parse "host:port", or a bare host with the switcher's default port.
pub fn parse_device_addr(addr: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        return Ok(socket_addr);
    }
    let ip: std::net::IpAddr = addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid device address {addr:?}: {e}"))?;
    Ok(SocketAddr::new(ip, atem_protocol::DEFAULT_PORT))
}
