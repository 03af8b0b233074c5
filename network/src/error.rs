use std::io;

use core_types::ConnectionId;
use thiserror::Error;

/// Errors from connection and listener management
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Auxiliary connection ids must not be negative for outgoing connections: {0}")]
    NegativeAuxiliaryId(ConnectionId),

    #[error("Primary connection must be open before auxiliary connection {0}")]
    PrimaryConnectionDown(ConnectionId),

    #[error("Failed to connect to {id}: {source}")]
    Connect {
        id: ConnectionId,
        #[source]
        source: io::Error,
    },

    #[error("Connection already registered: {0}")]
    DuplicateConnection(ConnectionId),

    #[error("Connection closed: {0}")]
    ConnectionClosed(ConnectionId),

    #[error("Message of {size} bytes exceeds frame limit {max} on {id}")]
    MessageTooLarge {
        id: ConnectionId,
        size: usize,
        max: usize,
    },

    #[error("Listener already bound: {0}")]
    ListenerAlreadyBound(ConnectionId),

    #[error("No listener bound for: {0}")]
    ListenerNotBound(ConnectionId),

    #[error("Failed to bind listener {id}: {source}")]
    Bind {
        id: ConnectionId,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
