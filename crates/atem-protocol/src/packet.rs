//! Packet codec -- one UDP datagram to one [`Packet`] and back.
//!
//! Header layout (12 bytes, big-endian):
//!
//! | bytes | field                                         |
//! |-------|-----------------------------------------------|
//! | 0-1   | flags (top 5 bits) \| length (low 11 bits)     |
//! | 2-3   | session identifier                            |
//! | 4-5   | acknowledged packet number                    |
//! | 6-9   | reserved                                      |
//! | 10-11 | packet number                                 |
//!
//! The codec is pure: it exposes flags but does not act on them.

use std::fmt;
use std::ops::BitOr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::envelope::{self, FramedMessage};
use crate::wire;
use crate::ProtocolError;

/// Fixed header size.
pub const HEADER_LEN: usize = 12;

/// Largest datagram the 11-bit length field can describe.
pub const MAX_PACKET_LEN: usize = 0x07ff;

const LENGTH_MASK: u16 = 0x07ff;

/// Flag bits, as they appear in the first header byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// Reliable packet: the receiver must acknowledge its number.
    pub const ACK_REQUEST: Self = Self(0x08);
    /// Handshake packet; the payload is a handshake body, not frames.
    pub const CONNECT: Self = Self(0x10);
    /// Retransmission of a packet that may already have been delivered.
    pub const REPEATED: Self = Self(0x20);
    /// The acknowledgement field is valid.
    pub const ACK: Self = Self(0x80);

    const MASK: u8 = 0xf8;
    const NAMES: [(Self, &'static str); 4] = [
        (Self::ACK_REQUEST, "ACK_REQUEST"),
        (Self::CONNECT, "CONNECT"),
        (Self::REPEATED, "REPEATED"),
        (Self::ACK, "ACK"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Keep every flag bit, including ones without modeled meaning.
    pub const fn from_bits_retain(bits: u8) -> Self {
        Self(bits & Self::MASK)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for PacketFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for PacketFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        let mut rest = self.0;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
                rest &= !flag.0;
            }
        }
        if rest != 0 {
            set.entry(&format_args!("{rest:#04x}"));
        }
        set.finish()
    }
}

/// Structured form of one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub flags: PacketFlags,
    pub session_id: u16,
    pub acknowledgement: u16,
    pub number: u16,
    pub payload: Bytes,
}

impl Packet {
    pub fn is_connect(&self) -> bool {
        self.flags.contains(PacketFlags::CONNECT)
    }

    pub fn is_repeated(&self) -> bool {
        self.flags.contains(PacketFlags::REPEATED)
    }

    pub fn requests_ack(&self) -> bool {
        self.flags.contains(PacketFlags::ACK_REQUEST)
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(PacketFlags::ACK)
    }

    /// Total datagram length, header included.
    pub fn len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Frames in the payload. Handshake packets carry none.
    pub fn messages(&self) -> Result<Vec<FramedMessage>, ProtocolError> {
        if self.is_connect() {
            return Ok(Vec::new());
        }
        envelope::decode(&self.payload)
    }
}

/// Parse one datagram.
pub fn decode(datagram: &[u8]) -> Result<Packet, ProtocolError> {
    if datagram.len() < HEADER_LEN {
        return Err(ProtocolError::MalformedPacket(format!(
            "datagram is {} bytes, header needs {HEADER_LEN}",
            datagram.len()
        )));
    }

    let word = wire::read_u16(datagram, 0)?;
    let declared = (word & LENGTH_MASK) as usize;
    if declared != datagram.len() {
        return Err(ProtocolError::MalformedPacket(format!(
            "header declares {declared} bytes, datagram is {}",
            datagram.len()
        )));
    }

    let flags = PacketFlags::from_bits_retain((word >> 8) as u8);
    let payload = &datagram[HEADER_LEN..];
    if !flags.contains(PacketFlags::CONNECT) {
        envelope::validate(payload)
            .map_err(|e| ProtocolError::MalformedPacket(format!("payload: {e}")))?;
    }

    Ok(Packet {
        flags,
        session_id: wire::read_u16(datagram, 2)?,
        acknowledgement: wire::read_u16(datagram, 4)?,
        number: wire::read_u16(datagram, 10)?,
        payload: Bytes::copy_from_slice(payload),
    })
}

/// Serialize a packet. The length field is always recomputed.
pub fn encode(packet: &Packet) -> Result<Bytes, ProtocolError> {
    let mut dst = BytesMut::with_capacity(packet.len());
    encode_into(packet, &mut dst)?;
    Ok(dst.freeze())
}

pub fn encode_into(packet: &Packet, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let length = packet.len();
    if length > MAX_PACKET_LEN {
        return Err(ProtocolError::MessageTooLarge {
            size: length,
            max: MAX_PACKET_LEN,
        });
    }

    dst.reserve(length);
    dst.put_u16(((packet.flags.bits() as u16) << 8) | length as u16);
    dst.put_u16(packet.session_id);
    dst.put_u16(packet.acknowledgement);
    dst.put_u32(0);
    dst.put_u16(packet.number);
    dst.put_slice(&packet.payload);
    Ok(())
}
