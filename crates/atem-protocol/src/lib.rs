//! ATEM Protocol -- packet codec, message envelope, message registry.
//!
//! UDP between controller and switcher. One datagram per packet:
//! 12-byte header + a sequence of length-prefixed, 4-byte-tagged frames.
//! All integers are big-endian.

pub mod envelope;
pub mod messages;
pub mod packet;
pub mod registry;
pub mod state;
pub mod timing;
pub mod wire;

pub use envelope::{FramedMessage, Tag, FRAME_HEADER_LEN};
pub use messages::*;
pub use packet::{Packet, PacketFlags, HEADER_LEN, MAX_PACKET_LEN};
pub use registry::{DispatchReport, MessageRegistry, SubscriberError, Subscribers};
pub use state::{SwitcherState, MAX_SIMULATED_INPUTS, MAX_SIMULATED_MIX_EFFECTS};
pub use timing::{ProtocolTiming, DEFAULT_TIMING};
pub use wire::BoundsError;

/// Default UDP port a switcher listens on.
pub const DEFAULT_PORT: u16 = 9910;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Bounds(#[from] BoundsError),
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
    #[error("truncated message: frame declares {declared} bytes, {remaining} remain")]
    TruncatedMessage { declared: usize, remaining: usize },
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("tag {0} registered twice")]
    DuplicateTagRegistration(Tag),
    #[error("no codec registered for tag {0}")]
    UnregisteredTag(Tag),
    #[error("{tag}: invalid {field} value {value}")]
    InvalidField {
        tag: Tag,
        field: &'static str,
        value: String,
    },
    #[error("message is not a {expected}")]
    KindMismatch { expected: Tag },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
