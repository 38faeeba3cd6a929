//! Typed messages carried inside packet payloads.
//!
//! Every kind implements [`MessageKind`]; the closed [`Message`] enum is what
//! the registry hands out. Tags without a registered codec arrive as
//! [`Message::Unknown`] with their body copied verbatim.

pub mod bus;
pub mod capabilities;
pub mod system;
pub mod video_source;

use bytes::{Bytes, BytesMut};
use serde::{Serialize, Serializer};

use crate::envelope::Tag;
use crate::state::SwitcherState;
use crate::ProtocolError;

pub use bus::{ChangePreviewBus, ChangeProgramBus, PreviewBusChanged, ProgramBusChanged};
pub use capabilities::{Availability, ExternalInterfaces, MixEffects};
pub use system::{InitiationComplete, ProtocolVersion};
pub use video_source::{SourceKind, VideoSource, VideoSourcePropertiesChanged};

/// One message kind: a fixed tag plus a body codec.
pub trait MessageKind: Sized + Clone + Into<Message> {
    const TAG: Tag;
    const KIND: MessageKindId;

    fn decode(body: &[u8]) -> Result<Self, ProtocolError>;

    fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError>;

    /// Fold this message into a state mirror. Commands leave it unchanged.
    fn apply(&self, _state: &mut SwitcherState) {}

    fn from_message(message: &Message) -> Option<&Self>;
}

/// Discriminant of [`Message`], used to key subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKindId {
    VideoSourceProperties,
    ProtocolVersion,
    ProgramBusChanged,
    PreviewBusChanged,
    ChangeProgramBus,
    ChangePreviewBus,
    InitiationComplete,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    VideoSourceProperties(VideoSourcePropertiesChanged),
    ProtocolVersion(ProtocolVersion),
    ProgramBusChanged(ProgramBusChanged),
    PreviewBusChanged(PreviewBusChanged),
    ChangeProgramBus(ChangeProgramBus),
    ChangePreviewBus(ChangePreviewBus),
    InitiationComplete(InitiationComplete),
    Unknown {
        tag: Tag,
        #[serde(serialize_with = "hex_body")]
        body: Bytes,
    },
}

fn hex_body<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(body))
}

impl Message {
    pub fn tag(&self) -> Tag {
        match self {
            Message::VideoSourceProperties(_) => VideoSourcePropertiesChanged::TAG,
            Message::ProtocolVersion(_) => ProtocolVersion::TAG,
            Message::ProgramBusChanged(_) => ProgramBusChanged::TAG,
            Message::PreviewBusChanged(_) => PreviewBusChanged::TAG,
            Message::ChangeProgramBus(_) => ChangeProgramBus::TAG,
            Message::ChangePreviewBus(_) => ChangePreviewBus::TAG,
            Message::InitiationComplete(_) => InitiationComplete::TAG,
            Message::Unknown { tag, .. } => *tag,
        }
    }

    pub fn kind(&self) -> MessageKindId {
        match self {
            Message::VideoSourceProperties(_) => MessageKindId::VideoSourceProperties,
            Message::ProtocolVersion(_) => MessageKindId::ProtocolVersion,
            Message::ProgramBusChanged(_) => MessageKindId::ProgramBusChanged,
            Message::PreviewBusChanged(_) => MessageKindId::PreviewBusChanged,
            Message::ChangeProgramBus(_) => MessageKindId::ChangeProgramBus,
            Message::ChangePreviewBus(_) => MessageKindId::ChangePreviewBus,
            Message::InitiationComplete(_) => MessageKindId::InitiationComplete,
            Message::Unknown { .. } => MessageKindId::Unknown,
        }
    }

    /// Fold into a state mirror. Unknown messages are ignored.
    pub fn apply(&self, state: &mut SwitcherState) {
        match self {
            Message::VideoSourceProperties(m) => m.apply(state),
            Message::ProtocolVersion(m) => m.apply(state),
            Message::ProgramBusChanged(m) => m.apply(state),
            Message::PreviewBusChanged(m) => m.apply(state),
            Message::ChangeProgramBus(m) => m.apply(state),
            Message::ChangePreviewBus(m) => m.apply(state),
            Message::InitiationComplete(m) => m.apply(state),
            Message::Unknown { .. } => {}
        }
    }

    /// True for controller-to-device commands.
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            Message::ChangeProgramBus(_) | Message::ChangePreviewBus(_)
        )
    }
}
