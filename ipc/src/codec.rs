//! Per-kind payload codecs and the master codec
//!
//! Encoding a message is two steps: the kind-specific codec turns the struct
//! into payload bytes, then the envelope codec wraps them with the kind tag.
//! Decoding runs the same steps backwards, choosing the payload codec from
//! the tag through the [`MessageTypeRegistry`].

use std::any::type_name;
use std::collections::HashMap;
use std::marker::PhantomData;

use thiserror::Error;

use crate::{
    Envelope, EnvelopeCodec, ExecutionRequest, ExecutionResponse, Message, MessageKind, Ping,
    Pong, ResourceRequest, ResourceResponse, WireMessage,
};

/// Any failure to encode or decode a protocol message
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode {kind} payload: {source}")]
    Encode {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode {kind} payload: {source}")]
    Decode {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("No message kind registered for type {0}")]
    UnregisteredType(&'static str),

    #[error("No codec registered for message kind {0}")]
    NoCodec(MessageKind),
}

/// Encodes and decodes the payload of one message kind
pub trait MessageCodec {
    type Message;

    fn encode(&self, message: &Self::Message) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<Self::Message, CodecError>;
}

/// JSON payload codec for a single message type
#[derive(Debug)]
pub struct JsonCodec<T> {
    kind: MessageKind,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            _marker: PhantomData,
        }
    }
}

impl<T: WireMessage> MessageCodec for JsonCodec<T> {
    type Message = T;

    fn encode(&self, message: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(message).map_err(|source| CodecError::Encode {
            kind: self.kind,
            source,
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|source| CodecError::Decode {
            kind: self.kind,
            source,
        })
    }
}

type DecodeFn = fn(MessageKind, &[u8]) -> Result<Message, CodecError>;

fn decode_as<T: WireMessage>(kind: MessageKind, bytes: &[u8]) -> Result<Message, CodecError> {
    JsonCodec::<T>::new(kind)
        .decode(bytes)
        .map(WireMessage::into_message)
}

/// Maps message kinds to Rust types and their payload decoders
#[derive(Debug, Default)]
pub struct MessageTypeRegistry {
    kinds: HashMap<&'static str, MessageKind>,
    names: HashMap<MessageKind, &'static str>,
    decoders: HashMap<MessageKind, DecodeFn>,
}

impl MessageTypeRegistry {
    /// Creates a registry with no kinds at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a registry holding all protocol messages
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register::<ExecutionRequest>(MessageKind::ExecutionRequest);
        registry.register::<ExecutionResponse>(MessageKind::ExecutionResponse);
        registry.register::<ResourceRequest>(MessageKind::ResourceRequest);
        registry.register::<ResourceResponse>(MessageKind::ResourceResponse);
        registry.register::<Ping>(MessageKind::Ping);
        registry.register::<Pong>(MessageKind::Pong);
        registry
    }

    /// Binds `T` to `kind`, replacing any earlier binding of either
    pub fn register<T: WireMessage>(&mut self, kind: MessageKind) {
        let name = type_name::<T>();
        if let Some(old_name) = self.names.insert(kind, name) {
            self.kinds.remove(old_name);
        }
        self.kinds.insert(name, kind);
        self.decoders.insert(kind, decode_as::<T>);
    }

    /// Returns the kind tag for messages of type `T`
    pub fn kind_of<T: WireMessage>(&self) -> Result<MessageKind, CodecError> {
        let name = type_name::<T>();
        self.kinds
            .get(name)
            .copied()
            .ok_or(CodecError::UnregisteredType(name))
    }

    /// Returns the Rust type name bound to `kind`
    pub fn type_name(&self, kind: MessageKind) -> Option<&'static str> {
        self.names.get(&kind).copied()
    }

    fn decode(&self, kind: MessageKind, payload: &[u8]) -> Result<Message, CodecError> {
        let decode = self.decoders.get(&kind).ok_or(CodecError::NoCodec(kind))?;
        decode(kind, payload)
    }
}

/// Turns any protocol message into frame bytes and back
#[derive(Debug)]
pub struct MasterCodec {
    types: MessageTypeRegistry,
    envelopes: EnvelopeCodec,
}

impl MasterCodec {
    pub fn new(types: MessageTypeRegistry) -> Self {
        Self {
            types,
            envelopes: EnvelopeCodec,
        }
    }

    pub fn types(&self) -> &MessageTypeRegistry {
        &self.types
    }

    pub fn encode<T: WireMessage>(&self, message: &T) -> Result<Vec<u8>, CodecError> {
        let kind = self.types.kind_of::<T>()?;
        let payload = JsonCodec::<T>::new(kind).encode(message)?;
        self.envelopes.encode(&Envelope::new(kind, payload))
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        let envelope = self.envelopes.decode(bytes)?;
        self.types.decode(envelope.kind, &envelope.payload)
    }
}

impl Default for MasterCodec {
    fn default() -> Self {
        Self::new(MessageTypeRegistry::standard())
    }
}
