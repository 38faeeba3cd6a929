//! Session-level messages: protocol version (`_ver`) and the end-of-dump
//! marker (`InCm`).

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use super::{Message, MessageKind, MessageKindId};
use crate::envelope::Tag;
use crate::state::SwitcherState;
use crate::wire;
use crate::ProtocolError;

/// `_ver`: first message of every state dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// Version reported by the simulated device.
    pub const CURRENT: Self = Self {
        major: 2,
        minor: 30,
    };
}

impl MessageKind for ProtocolVersion {
    const TAG: Tag = Tag::new(b"_ver");
    const KIND: MessageKindId = MessageKindId::ProtocolVersion;

    fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        Ok(Self {
            major: wire::read_u16(body, 0)?,
            minor: wire::read_u16(body, 2)?,
        })
    }

    fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        out.put_u16(self.major);
        out.put_u16(self.minor);
        Ok(())
    }

    fn apply(&self, state: &mut SwitcherState) {
        state.version = Some(*self);
    }

    fn from_message(message: &Message) -> Option<&Self> {
        match message {
            Message::ProtocolVersion(m) => Some(m),
            _ => None,
        }
    }
}

impl From<ProtocolVersion> for Message {
    fn from(m: ProtocolVersion) -> Self {
        Message::ProtocolVersion(m)
    }
}

/// `InCm`: the device has finished sending its initial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InitiationComplete;

impl MessageKind for InitiationComplete {
    const TAG: Tag = Tag::new(b"InCm");
    const KIND: MessageKindId = MessageKindId::InitiationComplete;

    fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        // Hardware always sends 1 here; anything else is still taken as done.
        wire::read_u8(body, 0)?;
        Ok(Self)
    }

    fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        out.put_slice(&[1, 0, 0, 0]);
        Ok(())
    }

    fn apply(&self, state: &mut SwitcherState) {
        state.initialized = true;
    }

    fn from_message(message: &Message) -> Option<&Self> {
        match message {
            Message::InitiationComplete(m) => Some(m),
            _ => None,
        }
    }
}

impl From<InitiationComplete> for Message {
    fn from(m: InitiationComplete) -> Self {
        Message::InitiationComplete(m)
    }
}
