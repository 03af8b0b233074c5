//! Unique identifiers for sessions and requests

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Unique identifier for a session
///
/// Sessions group related executions across peers. Both ends of a
/// conversation address the same session by the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a session ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({})", self.0)
    }
}

/// Unique identifier for one request within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new random request ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a request ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Request({})", self.0)
    }
}

/// Correlates a request with its response
///
/// The label is diagnostic only: equality and hashing consider the
/// session and request ids and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestIdentifier {
    pub session_id: SessionId,
    pub request_id: RequestId,
    pub label: Option<String>,
}

impl RequestIdentifier {
    /// Creates an identifier with a fresh request id in the given session
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            request_id: RequestId::new(),
            label: None,
        }
    }

    /// Creates an identifier from explicit parts
    pub fn from_parts(session_id: SessionId, request_id: RequestId) -> Self {
        Self {
            session_id,
            request_id,
            label: None,
        }
    }

    /// Attaches a human-readable label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl PartialEq for RequestIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.session_id == other.session_id && self.request_id == other.request_id
    }
}

impl Eq for RequestIdentifier {}

impl Hash for RequestIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.session_id.hash(state);
        self.request_id.hash(state);
    }
}

impl fmt::Display for RequestIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{}/{} ({})", self.session_id, self.request_id, label),
            None => write!(f, "{}/{}", self.session_id, self.request_id),
        }
    }
}
