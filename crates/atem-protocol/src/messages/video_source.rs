//! Video source identifiers and the `InPr` source-properties message.

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use super::capabilities::{Availability, ExternalInterfaces, MixEffects};
use super::{Message, MessageKind, MessageKindId};
use crate::envelope::Tag;
use crate::state::SwitcherState;
use crate::wire;
use crate::ProtocolError;

/// A routable video source, by its numeric identifier on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoSource {
    Black,
    /// Physical input, zero-based (`Input(0)` is "Input 1").
    Input(u16),
    ColorBars,
    Color(u8),
    MediaPlayer(u8),
    MediaPlayerKey(u8),
    KeyMask(u8),
    DownstreamKeyMask(u8),
    SuperSource,
    CleanFeed(u8),
    Auxiliary(u8),
    Program { me: u8 },
    Preview { me: u8 },
}

impl VideoSource {
    /// Wire identifier, or `None` if the index falls outside its block.
    pub fn id(self) -> Option<u16> {
        let (base, index, stride, limit) = match self {
            VideoSource::Black => return Some(0),
            VideoSource::ColorBars => return Some(1000),
            VideoSource::SuperSource => return Some(6000),
            VideoSource::Input(n) => (1, n, 1, 999),
            VideoSource::Color(n) => (2001, n as u16, 1, 99),
            VideoSource::MediaPlayer(n) => (3010, n as u16, 10, 99),
            VideoSource::MediaPlayerKey(n) => (3011, n as u16, 10, 99),
            VideoSource::KeyMask(n) => (4010, n as u16, 10, 99),
            VideoSource::DownstreamKeyMask(n) => (5010, n as u16, 10, 99),
            VideoSource::CleanFeed(n) => (7001, n as u16, 1, 99),
            VideoSource::Auxiliary(n) => (8001, n as u16, 1, 99),
            VideoSource::Program { me } => (10010, me as u16, 10, 254),
            VideoSource::Preview { me } => (10011, me as u16, 10, 254),
        };
        (index < limit).then(|| base + index * stride)
    }

    pub fn from_id(id: u16) -> Option<Self> {
        let source = match id {
            0 => VideoSource::Black,
            1..=999 => VideoSource::Input(id - 1),
            1000 => VideoSource::ColorBars,
            2001..=2099 => VideoSource::Color((id - 2001) as u8),
            3010..=3999 if id % 10 == 0 => VideoSource::MediaPlayer(((id - 3010) / 10) as u8),
            3011..=3999 if id % 10 == 1 => VideoSource::MediaPlayerKey(((id - 3011) / 10) as u8),
            4010..=4999 if id % 10 == 0 => VideoSource::KeyMask(((id - 4010) / 10) as u8),
            5010..=5999 if id % 10 == 0 => {
                VideoSource::DownstreamKeyMask(((id - 5010) / 10) as u8)
            }
            6000 => VideoSource::SuperSource,
            7001..=7099 => VideoSource::CleanFeed((id - 7001) as u8),
            8001..=8099 => VideoSource::Auxiliary((id - 8001) as u8),
            10010..=12549 if id % 10 == 0 => VideoSource::Program {
                me: ((id - 10010) / 10) as u8,
            },
            10011..=12549 if id % 10 == 1 => VideoSource::Preview {
                me: ((id - 10011) / 10) as u8,
            },
            _ => return None,
        };
        Some(source)
    }

    pub(crate) fn decode_at(tag: Tag, body: &[u8], offset: usize) -> Result<Self, ProtocolError> {
        let id = wire::read_u16(body, offset)?;
        Self::from_id(id).ok_or_else(|| ProtocolError::InvalidField {
            tag,
            field: "source",
            value: id.to_string(),
        })
    }

    pub(crate) fn encode_id(self, tag: Tag) -> Result<u16, ProtocolError> {
        self.id().ok_or_else(|| ProtocolError::InvalidField {
            tag,
            field: "source",
            value: format!("{self:?}"),
        })
    }
}

/// How a source's signal is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Generated inside the switcher (black, bars, colors, players, outputs).
    Black,
    /// Fed from an external SDI-class input.
    Sdi,
    /// Any other value the hardware reports, kept verbatim.
    Other(u8),
}

impl SourceKind {
    pub fn from_byte(value: u8) -> Self {
        match value {
            0 => SourceKind::Black,
            1 => SourceKind::Sdi,
            other => SourceKind::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            SourceKind::Black => 0,
            SourceKind::Sdi => 1,
            SourceKind::Other(value) => value,
        }
    }
}

/// `InPr`: names and capabilities of one video source.
///
/// Body layout (36 bytes):
///
/// | offset | size | field                          |
/// |--------|------|--------------------------------|
/// | 0      | 2    | source identifier              |
/// | 2      | 20   | long name, NUL padded          |
/// | 22     | 4    | short name, NUL or space padded |
/// | 27     | 1    | external interfaces            |
/// | 29     | 1    | source kind                    |
/// | 32     | 1    | availability                   |
/// | 33     | 1    | mix-effect availability        |
///
/// Bytes 26, 28, 30, 31, 34 and 35 are not modeled and encode as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoSourcePropertiesChanged {
    pub source: VideoSource,
    pub long_name: String,
    pub short_name: String,
    pub external_interfaces: ExternalInterfaces,
    pub kind: SourceKind,
    pub availability: Availability,
    pub mix_effects: MixEffects,
}

const BODY_LEN: usize = 36;
const LONG_NAME: (usize, usize) = (2, 20);
const SHORT_NAME: (usize, usize) = (22, 4);
const EXTERNAL_INTERFACES: usize = 27;
const SOURCE_KIND: usize = 29;
const AVAILABILITY: usize = 32;
const MIX_EFFECTS: usize = 33;

/// Text up to the first NUL; trailing spaces are padding.
fn read_text(body: &[u8], (offset, width): (usize, usize)) -> Result<String, ProtocolError> {
    let raw = wire::read_bytes(body, offset, width)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end])
        .trim_end_matches(' ')
        .to_string())
}

fn write_text(
    body: &mut [u8],
    (offset, width): (usize, usize),
    text: &str,
    field: &'static str,
) -> Result<(), ProtocolError> {
    if text.len() > width {
        return Err(ProtocolError::InvalidField {
            tag: VideoSourcePropertiesChanged::TAG,
            field,
            value: text.to_string(),
        });
    }
    wire::write_bytes(body, offset, text.as_bytes())?;
    Ok(())
}

impl MessageKind for VideoSourcePropertiesChanged {
    const TAG: Tag = Tag::new(b"InPr");
    const KIND: MessageKindId = MessageKindId::VideoSourceProperties;

    fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        // Reading the last modeled byte first bounds-checks the whole layout.
        let mix_effects = MixEffects::from_bits_truncate(wire::read_u8(body, MIX_EFFECTS)?);
        Ok(Self {
            source: VideoSource::decode_at(Self::TAG, body, 0)?,
            long_name: read_text(body, LONG_NAME)?,
            short_name: read_text(body, SHORT_NAME)?,
            external_interfaces: ExternalInterfaces::from_bits_truncate(wire::read_u8(
                body,
                EXTERNAL_INTERFACES,
            )?),
            kind: SourceKind::from_byte(wire::read_u8(body, SOURCE_KIND)?),
            availability: Availability::from_bits_truncate(wire::read_u8(body, AVAILABILITY)?),
            mix_effects,
        })
    }

    fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut body = [0u8; BODY_LEN];
        wire::write_u16(&mut body, 0, self.source.encode_id(Self::TAG)?)?;
        write_text(&mut body, LONG_NAME, &self.long_name, "long_name")?;
        write_text(&mut body, SHORT_NAME, &self.short_name, "short_name")?;
        wire::write_u8(&mut body, EXTERNAL_INTERFACES, self.external_interfaces.bits())?;
        wire::write_u8(&mut body, SOURCE_KIND, self.kind.to_byte())?;
        wire::write_u8(&mut body, AVAILABILITY, self.availability.bits())?;
        wire::write_u8(&mut body, MIX_EFFECTS, self.mix_effects.bits())?;
        out.put_slice(&body);
        Ok(())
    }

    fn apply(&self, state: &mut SwitcherState) {
        state.sources.insert(self.source, self.clone());
    }

    fn from_message(message: &Message) -> Option<&Self> {
        match message {
            Message::VideoSourceProperties(m) => Some(m),
            _ => None,
        }
    }
}

impl From<VideoSourcePropertiesChanged> for Message {
    fn from(m: VideoSourcePropertiesChanged) -> Self {
        Message::VideoSourceProperties(m)
    }
}
