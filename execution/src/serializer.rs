//! Pluggable serialization of task graphs.
//!
//! Tasks, return values and failures are converted to a self-describing
//! [`serde_json::Value`] first; a [`Serializer`] then turns that value into
//! opaque bytes tagged with its [`SerializationFormat`].

use ipc::SerializationFormat;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Failed to serialize value: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to deserialize value: {0}")]
    Deserialize(#[source] serde_json::Error),
}

pub trait Serializer: Send + Sync {
    fn format(&self) -> SerializationFormat;
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializationError>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Value, SerializationError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn format(&self) -> SerializationFormat {
        SerializationFormat::Json
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(value).map_err(SerializationError::Serialize)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, SerializationError> {
        serde_json::from_slice(bytes).map_err(SerializationError::Deserialize)
    }
}

pub fn to_value<T: Serialize>(value: &T) -> Result<Value, SerializationError> {
    serde_json::to_value(value).map_err(SerializationError::Serialize)
}

pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, SerializationError> {
    serde_json::from_value(value).map_err(SerializationError::Deserialize)
}

/// Serializes a typed value with `serializer`
pub fn encode<T: Serialize>(
    serializer: &dyn Serializer,
    value: &T,
) -> Result<Vec<u8>, SerializationError> {
    serializer.serialize(&to_value(value)?)
}

/// Deserializes a typed value with `serializer`
pub fn decode<T: DeserializeOwned>(
    serializer: &dyn Serializer,
    bytes: &[u8],
) -> Result<T, SerializationError> {
    from_value(serializer.deserialize(bytes)?)
}
