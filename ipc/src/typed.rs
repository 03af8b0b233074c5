//! Typed protocol messages.
//!
//! Every message that crosses a connection is one of the structs below,
//! wrapped in an [`crate::Envelope`] tagged with its [`crate::MessageKind`].

use core_types::{RequestId, RequestIdentifier};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::MessageKind;

/// Whether the caller waits for the outcome of a remote execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Caller blocks until the response arrives or the wait times out
    ReturnResponse,
    /// No response is sent and the caller does not wait
    FireAndForget,
}

/// How a remote execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    VoidReturned,
    ValueReturned,
    Failure,
}

/// Tag naming the serializer that produced an opaque payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SerializationFormat {
    Json,
}

/// Asks a peer to run a serialized task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(with = "base64_bytes")]
    pub serialized_task: Vec<u8>,
    pub serialization_format: SerializationFormat,
    pub execution_mode: ExecutionMode,
    pub request_identifier: RequestIdentifier,
}

/// Result of a task run in [`ExecutionMode::ReturnResponse`] mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub outcome: ExecutionOutcome,
    #[serde(with = "base64_bytes")]
    pub serialized_return: Vec<u8>,
    pub serialization_format: SerializationFormat,
    pub request_identifier: RequestIdentifier,
}

/// Asks the peer for named resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub resource_names: Vec<String>,
    pub request_identifier: RequestIdentifier,
}

/// One named resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceData {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl ResourceData {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Resources the peer could supply; missing names are simply absent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub resources: Vec<ResourceData>,
    pub request_identifier: RequestIdentifier,
}

impl ResourceResponse {
    /// Returns the entry for `name`, if the peer supplied one
    pub fn find(&self, name: &str) -> Option<&ResourceData> {
        self.resources.iter().find(|resource| resource.name == name)
    }
}

/// Liveness probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub request_id: RequestId,
    pub message: String,
}

impl Ping {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            message: message.into(),
        }
    }

    /// Builds the reply for this probe
    pub fn reply(&self) -> Pong {
        Pong {
            request_id: self.request_id,
            message: format!("PONG! {}", self.message),
        }
    }
}

/// Reply to a [`Ping`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub request_id: RequestId,
    pub message: String,
}

/// Opaque byte fields travel as base64 strings rather than number arrays
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(DeError::custom)
    }
}

/// Any decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ExecutionRequest(ExecutionRequest),
    ExecutionResponse(ExecutionResponse),
    ResourceRequest(ResourceRequest),
    ResourceResponse(ResourceResponse),
    Ping(Ping),
    Pong(Pong),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::ExecutionRequest(_) => MessageKind::ExecutionRequest,
            Message::ExecutionResponse(_) => MessageKind::ExecutionResponse,
            Message::ResourceRequest(_) => MessageKind::ResourceRequest,
            Message::ResourceResponse(_) => MessageKind::ResourceResponse,
            Message::Ping(_) => MessageKind::Ping,
            Message::Pong(_) => MessageKind::Pong,
        }
    }
}

/// A struct that can travel as the payload of an envelope
pub trait WireMessage: Serialize + DeserializeOwned + Send + 'static {
    fn into_message(self) -> Message;
}

impl WireMessage for ExecutionRequest {
    fn into_message(self) -> Message {
        Message::ExecutionRequest(self)
    }
}

impl WireMessage for ExecutionResponse {
    fn into_message(self) -> Message {
        Message::ExecutionResponse(self)
    }
}

impl WireMessage for ResourceRequest {
    fn into_message(self) -> Message {
        Message::ResourceRequest(self)
    }
}

impl WireMessage for ResourceResponse {
    fn into_message(self) -> Message {
        Message::ResourceResponse(self)
    }
}

impl WireMessage for Ping {
    fn into_message(self) -> Message {
        Message::Ping(self)
    }
}

impl WireMessage for Pong {
    fn into_message(self) -> Message {
        Message::Pong(self)
    }
}
