//! Endpoint identifiers for connections and listeners

use serde::{Deserialize, Serialize};
use std::fmt;

/// Port a host listens on when none is given explicitly.
pub const DEFAULT_PORT: u16 = 5739;

/// Identifies a connection or a listener by address, port and auxiliary id.
///
/// The auxiliary id separates several connections to the same address and
/// port:
/// - `0` is the primary connection
/// - positive values are extra outgoing connections chosen by the caller
/// - negative values are assigned to incoming connections by the local
///   listener when the primary slot for that peer is already taken
///
/// Auxiliary ids are a local concept and are never transmitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId {
    pub address: String,
    pub port: u16,
    pub auxiliary_id: i32,
}

impl ConnectionId {
    /// Creates a primary identifier
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self::auxiliary(address, port, 0)
    }

    /// Creates an identifier with an explicit auxiliary id
    pub fn auxiliary(address: impl Into<String>, port: u16, auxiliary_id: i32) -> Self {
        Self {
            address: address.into(),
            port,
            auxiliary_id,
        }
    }

    /// Creates a primary identifier on [`DEFAULT_PORT`]
    pub fn with_default_port(address: impl Into<String>) -> Self {
        Self::new(address, DEFAULT_PORT)
    }

    /// Returns the primary identifier for the same address and port
    pub fn primary(&self) -> Self {
        Self::new(self.address.clone(), self.port)
    }

    pub fn is_primary(&self) -> bool {
        self.auxiliary_id == 0
    }

    /// True for ids that only a listener may assign
    pub fn is_listener_assigned(&self) -> bool {
        self.auxiliary_id < 0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.address, self.port, self.auxiliary_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_strips_auxiliary_id() {
        let aux = ConnectionId::auxiliary("10.0.0.1", 8080, 3);
        assert!(!aux.is_primary());
        assert_eq!(aux.primary(), ConnectionId::new("10.0.0.1", 8080));
        assert!(aux.primary().is_primary());
    }

    #[test]
    fn test_listener_assigned_ids_are_negative() {
        assert!(ConnectionId::auxiliary("h", 1, -1).is_listener_assigned());
        assert!(!ConnectionId::auxiliary("h", 1, 1).is_listener_assigned());
        assert!(!ConnectionId::new("h", 1).is_listener_assigned());
    }

    #[test]
    fn test_equality_covers_all_fields() {
        let a = ConnectionId::new("127.0.0.1", 5739);
        assert_eq!(a, ConnectionId::with_default_port("127.0.0.1"));
        assert_ne!(a, ConnectionId::auxiliary("127.0.0.1", 5739, 1));
        assert_ne!(a, ConnectionId::new("127.0.0.1", 5740));
        assert_ne!(a, ConnectionId::new("localhost", 5739));
    }

    #[test]
    fn test_display() {
        let id = ConnectionId::auxiliary("example.org", 42, -2);
        assert_eq!(id.to_string(), "example.org:42#-2");
    }
}
