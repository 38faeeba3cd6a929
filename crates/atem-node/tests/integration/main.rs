//! Integration test entry point for atem-node.
//!
//! Controller and simulated device talk over real loopback UDP sockets.

mod loopback;
