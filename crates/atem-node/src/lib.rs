//! ATEM Node -- library crate behind the `atem-node` binary.
//!
//! Exposes config and the UDP driver so integration tests can run a
//! controller and a simulated device in one tokio runtime.

pub mod config;
pub mod udp_task;

use std::path::PathBuf;

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs_or_home() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn dirs_or_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
