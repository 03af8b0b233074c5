use std::io;
use std::time::Duration;

use core_types::{ConnectionId, RequestIdentifier};
use ipc::{CodecError, SerializationFormat};
use network::NetworkError;
use thiserror::Error;

use crate::serializer::SerializationError;
use crate::task::TaskFailure;

/// Errors surfaced to callers of remote execution
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Timed out after {timeout:?} waiting for response to {request}")]
    Timeout {
        request: RequestIdentifier,
        timeout: Duration,
    },

    #[error("No pong from {connection} within {timeout:?}")]
    PingTimeout {
        connection: ConnectionId,
        timeout: Duration,
    },

    #[error("Remote execution of {request} on {connection} failed: {source}")]
    RemoteFailure {
        connection: ConnectionId,
        request: RequestIdentifier,
        #[source]
        source: TaskFailure,
    },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Unsupported serialization format: {0:?}")]
    UnsupportedFormat(SerializationFormat),

    #[error("Request already pending: {0}")]
    DuplicateRequest(String),

    #[error("Execution coordinator has shut down")]
    CoordinatorShutDown,

    #[error("Worker pool has shut down")]
    PoolShutDown,

    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] io::Error),
}

/// Errors from resolving a named resource
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Timed out after {timeout:?} waiting for resource {name}")]
    Timeout { name: String, timeout: Duration },

    #[error("Failed to read resource {name}: {source}")]
    Source {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to request resource {name}: {source}")]
    Request {
        name: String,
        #[source]
        source: ExecutionError,
    },
}
