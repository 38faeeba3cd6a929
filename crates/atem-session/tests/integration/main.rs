//! Integration test entry point for atem-session.
//!
//! A controller and a device talk over an in-memory link driven by a
//! simulated clock, so every scenario is deterministic.

mod harness;
mod handshake;
mod streaming;
