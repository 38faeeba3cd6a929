//! Program and preview bus: change notifications (`PrgI`, `PrvI`) and the
//! commands that request a change (`CPgI`, `CPvI`).
//!
//! All four share a prefix: u8 mix-effect block, u8 reserved, u16 source.
//! `PrvI` carries four more reserved bytes.

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use super::{Message, MessageKind, MessageKindId, VideoSource};
use crate::envelope::Tag;
use crate::state::SwitcherState;
use crate::wire;
use crate::ProtocolError;

fn decode_selection(tag: Tag, body: &[u8]) -> Result<(u8, VideoSource), ProtocolError> {
    let mix_effect = wire::read_u8(body, 0)?;
    let source = VideoSource::decode_at(tag, body, 2)?;
    Ok((mix_effect, source))
}

fn encode_selection(
    tag: Tag,
    mix_effect: u8,
    source: VideoSource,
    padding: usize,
    out: &mut BytesMut,
) -> Result<(), ProtocolError> {
    let id = source.encode_id(tag)?;
    out.put_u8(mix_effect);
    out.put_u8(0);
    out.put_u16(id);
    out.put_bytes(0, padding);
    Ok(())
}

macro_rules! bus_message {
    (
        $(#[$meta:meta])*
        $name:ident, $tag:literal, $variant:ident, padding = $padding:expr, apply = $apply:expr
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
        pub struct $name {
            pub mix_effect: u8,
            pub source: VideoSource,
        }

        impl MessageKind for $name {
            const TAG: Tag = Tag::new($tag);
            const KIND: MessageKindId = MessageKindId::$variant;

            fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
                let (mix_effect, source) = decode_selection(Self::TAG, body)?;
                Ok(Self { mix_effect, source })
            }

            fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
                encode_selection(Self::TAG, self.mix_effect, self.source, $padding, out)
            }

            fn apply(&self, state: &mut SwitcherState) {
                let apply: fn(&Self, &mut SwitcherState) = $apply;
                apply(self, state)
            }

            fn from_message(message: &Message) -> Option<&Self> {
                match message {
                    Message::$variant(m) => Some(m),
                    _ => None,
                }
            }
        }

        impl From<$name> for Message {
            fn from(m: $name) -> Self {
                Message::$variant(m)
            }
        }
    };
}

bus_message! {
    /// `PrgI`: the program bus of a mix-effect block now shows `source`.
    ProgramBusChanged, b"PrgI", ProgramBusChanged, padding = 0,
    apply = |m, state| {
        state.program.insert(m.mix_effect, m.source);
    }
}

bus_message! {
    /// `PrvI`: the preview bus of a mix-effect block now shows `source`.
    PreviewBusChanged, b"PrvI", PreviewBusChanged, padding = 4,
    apply = |m, state| {
        state.preview.insert(m.mix_effect, m.source);
    }
}

bus_message! {
    /// `CPgI`: request a program bus change.
    ChangeProgramBus, b"CPgI", ChangeProgramBus, padding = 0,
    apply = |_, _| {}
}

bus_message! {
    /// `CPvI`: request a preview bus change.
    ChangePreviewBus, b"CPvI", ChangePreviewBus, padding = 0,
    apply = |_, _| {}
}
