//! Message kinds and the outer envelope

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;

use crate::CodecError;

/// Tag identifying which message a payload carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    ExecutionRequest,
    ExecutionResponse,
    ResourceRequest,
    ResourceResponse,
    Ping,
    Pong,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::ExecutionRequest => "ExecutionRequest",
            MessageKind::ExecutionResponse => "ExecutionResponse",
            MessageKind::ResourceRequest => "ResourceRequest",
            MessageKind::ResourceResponse => "ResourceResponse",
            MessageKind::Ping => "Ping",
            MessageKind::Pong => "Pong",
        };
        f.write_str(name)
    }
}

/// Outer wrapper for every frame on the wire
///
/// The payload holds the kind-specific encoding, which must itself be a JSON
/// document; the envelope only says how to interpret it. On the wire the
/// payload is embedded as-is rather than re-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(kind: MessageKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope<'a> {
    kind: MessageKind,
    #[serde(borrow)]
    payload: &'a RawValue,
}

/// Encodes and decodes [`Envelope`] values
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        let payload: &RawValue =
            serde_json::from_slice(&envelope.payload).map_err(CodecError::Envelope)?;
        let wire = WireEnvelope {
            kind: envelope.kind,
            payload,
        };
        serde_json::to_vec(&wire).map_err(CodecError::Envelope)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        let wire: WireEnvelope<'_> = serde_json::from_slice(bytes).map_err(CodecError::Envelope)?;
        Ok(Envelope::new(wire.kind, wire.payload.get().as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_codec_preserves_kind_and_payload() {
        let codec = EnvelopeCodec;
        let envelope = Envelope::new(MessageKind::ResourceRequest, br#"{"names":["a"]}"#.to_vec());
        let bytes = codec.encode(&envelope).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_envelope_embeds_payload_without_reencoding() {
        let codec = EnvelopeCodec;
        let payload = br#"{"data":"/wAQ"}"#;
        let envelope = Envelope::new(MessageKind::ResourceResponse, payload.to_vec());
        let bytes = codec.encode(&envelope).unwrap();
        assert_eq!(bytes.len(), payload.len() + r#"{"kind":"ResourceResponse","payload":}"#.len());
    }

    #[test]
    fn test_envelope_codec_rejects_non_json_payload() {
        let codec = EnvelopeCodec;
        let envelope = Envelope::new(MessageKind::Ping, vec![0, 1, 2, 255]);
        assert!(matches!(codec.encode(&envelope), Err(CodecError::Envelope(_))));
    }

    #[test]
    fn test_envelope_codec_rejects_garbage() {
        let codec = EnvelopeCodec;
        let result = codec.decode(b"\x00\x01not an envelope");
        assert!(matches!(result, Err(CodecError::Envelope(_))));
    }

    #[test]
    fn test_envelope_codec_rejects_unknown_kind() {
        let codec = EnvelopeCodec;
        let result = codec.decode(br#"{"kind":"Teleport","payload":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_message_kind_display() {
        assert_eq!(MessageKind::ExecutionResponse.to_string(), "ExecutionResponse");
        assert_eq!(MessageKind::Pong.to_string(), "Pong");
    }
}
