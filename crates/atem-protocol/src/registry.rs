//! Tag registry and typed subscribers.
//!
//! [`MessageRegistry`] maps each 4-byte tag to a decode/encode pair and is
//! read-only once built, so one instance is shared by every session behind an
//! `Arc`. [`Subscribers`] fans a decoded [`Message`] out to callbacks keyed by
//! message kind; a failing callback never stops delivery to the rest.

use std::collections::HashMap;
use std::fmt;

use bytes::BytesMut;

use crate::envelope::{self, FramedMessage, Tag};
use crate::messages::*;
use crate::ProtocolError;

pub type DecodeFn = fn(&[u8]) -> Result<Message, ProtocolError>;
pub type EncodeFn = fn(&Message, &mut BytesMut) -> Result<(), ProtocolError>;

#[derive(Clone, Copy)]
struct Codec {
    decode: DecodeFn,
    encode: EncodeFn,
}

fn decode_kind<T: MessageKind>(body: &[u8]) -> Result<Message, ProtocolError> {
    T::decode(body).map(Into::into)
}

fn encode_kind<T: MessageKind>(message: &Message, out: &mut BytesMut) -> Result<(), ProtocolError> {
    T::from_message(message)
        .ok_or(ProtocolError::KindMismatch { expected: T::TAG })?
        .encode(out)
}

#[derive(Default, Clone)]
pub struct MessageRegistry {
    codecs: HashMap<Tag, Codec>,
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.codecs.keys().collect();
        tags.sort();
        f.debug_struct("MessageRegistry").field("tags", &tags).finish()
    }
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every message kind this crate models.
    pub fn standard() -> Result<Self, ProtocolError> {
        let mut registry = Self::new();
        registry.register_kind::<VideoSourcePropertiesChanged>()?;
        registry.register_kind::<ProtocolVersion>()?;
        registry.register_kind::<ProgramBusChanged>()?;
        registry.register_kind::<PreviewBusChanged>()?;
        registry.register_kind::<ChangeProgramBus>()?;
        registry.register_kind::<ChangePreviewBus>()?;
        registry.register_kind::<InitiationComplete>()?;
        Ok(registry)
    }

    pub fn register(
        &mut self,
        tag: Tag,
        decode: DecodeFn,
        encode: EncodeFn,
    ) -> Result<(), ProtocolError> {
        if self.codecs.contains_key(&tag) {
            return Err(ProtocolError::DuplicateTagRegistration(tag));
        }
        self.codecs.insert(tag, Codec { decode, encode });
        Ok(())
    }

    pub fn register_kind<T: MessageKind>(&mut self) -> Result<(), ProtocolError> {
        self.register(T::TAG, decode_kind::<T>, encode_kind::<T>)
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.codecs.contains_key(&tag)
    }

    /// Decode one frame body. Unregistered tags pass through as
    /// [`Message::Unknown`]; a registered tag with a bad body is an error for
    /// that frame only.
    pub fn dispatch(&self, tag: Tag, body: &[u8]) -> Result<Message, ProtocolError> {
        match self.codecs.get(&tag) {
            Some(codec) => (codec.decode)(body),
            None => Ok(Message::Unknown {
                tag,
                body: bytes::Bytes::copy_from_slice(body),
            }),
        }
    }

    /// Decode every frame of a payload. The outer error means the envelope
    /// itself is broken; inner errors belong to single frames.
    pub fn dispatch_payload(
        &self,
        payload: &[u8],
    ) -> Result<Vec<Result<Message, ProtocolError>>, ProtocolError> {
        Ok(envelope::decode(payload)?
            .into_iter()
            .map(|frame| self.dispatch(frame.tag, &frame.body))
            .collect())
    }

    pub fn encode(&self, message: &Message) -> Result<FramedMessage, ProtocolError> {
        if let Message::Unknown { tag, body } = message {
            return Ok(FramedMessage::new(*tag, body.clone()));
        }
        let tag = message.tag();
        let codec = self
            .codecs
            .get(&tag)
            .ok_or(ProtocolError::UnregisteredTag(tag))?;
        let mut body = BytesMut::new();
        (codec.encode)(message, &mut body)?;
        Ok(FramedMessage::new(tag, body.freeze()))
    }
}

/// Error a subscriber callback may return.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

type Callback = Box<dyn FnMut(&Message) -> Result<(), SubscriberError> + Send>;

/// Outcome of one [`Subscribers::notify`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct Subscribers {
    by_kind: HashMap<MessageKindId, Vec<Callback>>,
    any: Vec<Callback>,
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let typed: usize = self.by_kind.values().map(Vec::len).sum();
        f.debug_struct("Subscribers")
            .field("typed", &typed)
            .field("any", &self.any.len())
            .finish()
    }
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one message kind.
    pub fn on<T, F>(&mut self, mut callback: F)
    where
        T: MessageKind + 'static,
        F: FnMut(&T) -> Result<(), SubscriberError> + Send + 'static,
    {
        self.by_kind
            .entry(T::KIND)
            .or_default()
            .push(Box::new(move |message: &Message| match T::from_message(message) {
                Some(typed) => callback(typed),
                None => Ok(()),
            }));
    }

    /// Subscribe to frames whose tag has no registered codec.
    pub fn on_unknown<F>(&mut self, mut callback: F)
    where
        F: FnMut(Tag, &[u8]) -> Result<(), SubscriberError> + Send + 'static,
    {
        self.by_kind
            .entry(MessageKindId::Unknown)
            .or_default()
            .push(Box::new(move |message: &Message| match message {
                Message::Unknown { tag, body } => callback(*tag, body),
                _ => Ok(()),
            }));
    }

    /// Subscribe to every message, after the kind-specific subscribers.
    pub fn on_any<F>(&mut self, callback: F)
    where
        F: FnMut(&Message) -> Result<(), SubscriberError> + Send + 'static,
    {
        self.any.push(Box::new(callback));
    }

    pub fn is_empty(&self) -> bool {
        self.any.is_empty() && self.by_kind.values().all(Vec::is_empty)
    }

    pub fn notify(&mut self, message: &Message) -> DispatchReport {
        let mut report = DispatchReport::default();
        let typed = self
            .by_kind
            .get_mut(&message.kind())
            .into_iter()
            .flat_map(|callbacks| callbacks.iter_mut());
        for callback in typed.chain(self.any.iter_mut()) {
            match callback(message) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(tag = %message.tag(), error = %e, "subscriber failed");
                }
            }
        }
        report
    }
}
