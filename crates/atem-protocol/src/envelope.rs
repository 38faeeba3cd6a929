//! Message envelope -- the tagged frames carried in a packet payload.
//!
//! Wire format per frame:
//!   u16 length (whole frame, header included) | u16 reserved | 4-byte ASCII tag | body
//!
//! Frames are concatenated with no padding. Order matters: later frames may
//! refer to state established by earlier ones.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Serialize, Serializer};

use crate::wire;
use crate::ProtocolError;

/// Size of the per-frame header (length, reserved, tag).
pub const FRAME_HEADER_LEN: usize = 8;

/// Largest frame the 16-bit length field can describe.
const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Four-byte command identifier, e.g. `InPr`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    pub const fn new(bytes: &[u8; 4]) -> Self {
        Self(*bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({self})")
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One command inside a payload. The body is owned: it outlives the datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedMessage {
    pub tag: Tag,
    pub body: Bytes,
}

impl FramedMessage {
    pub fn new(tag: Tag, body: impl Into<Bytes>) -> Self {
        Self {
            tag,
            body: body.into(),
        }
    }

    /// Bytes this frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN + self.body.len()
    }
}

/// Locate the frame starting at `cursor`: returns its tag, body range and end.
fn frame_at(
    payload: &[u8],
    cursor: usize,
) -> Result<(Tag, std::ops::Range<usize>, usize), ProtocolError> {
    let remaining = payload.len() - cursor;
    if remaining < FRAME_HEADER_LEN {
        return Err(ProtocolError::TruncatedMessage {
            declared: FRAME_HEADER_LEN,
            remaining,
        });
    }

    let declared = wire::read_u16(payload, cursor)? as usize;
    if declared < FRAME_HEADER_LEN {
        return Err(ProtocolError::MalformedPacket(format!(
            "frame at offset {cursor} declares {declared} bytes, shorter than its header"
        )));
    }
    if declared > remaining {
        return Err(ProtocolError::TruncatedMessage {
            declared,
            remaining,
        });
    }

    let tag = Tag(wire::read_array(payload, cursor + 4)?);
    let end = cursor + declared;
    Ok((tag, cursor + FRAME_HEADER_LEN..end, end))
}

/// Walk the frame headers without copying; returns the frame count.
pub fn validate(payload: &[u8]) -> Result<usize, ProtocolError> {
    let mut cursor = 0;
    let mut count = 0;
    while cursor < payload.len() {
        let (_, _, end) = frame_at(payload, cursor)?;
        cursor = end;
        count += 1;
    }
    Ok(count)
}

/// Split a payload into frames. Bodies are copied out of `payload`.
pub fn decode(payload: &[u8]) -> Result<Vec<FramedMessage>, ProtocolError> {
    let mut messages = Vec::new();
    let mut cursor = 0;
    while cursor < payload.len() {
        let (tag, body, end) = frame_at(payload, cursor)?;
        messages.push(FramedMessage::new(
            tag,
            Bytes::copy_from_slice(&payload[body]),
        ));
        cursor = end;
    }
    Ok(messages)
}

/// Append frames to `dst` in the given order.
pub fn encode_into(messages: &[FramedMessage], dst: &mut BytesMut) -> Result<(), ProtocolError> {
    for message in messages {
        let length = message.encoded_len();
        if length > MAX_FRAME_LEN {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: MAX_FRAME_LEN,
            });
        }
        dst.reserve(length);
        dst.put_u16(length as u16);
        dst.put_u16(0);
        dst.put_slice(message.tag.as_bytes());
        dst.put_slice(&message.body);
    }
    Ok(())
}

pub fn encode(messages: &[FramedMessage]) -> Result<Bytes, ProtocolError> {
    let mut dst = BytesMut::with_capacity(messages.iter().map(FramedMessage::encoded_len).sum());
    encode_into(messages, &mut dst)?;
    Ok(dst.freeze())
}
