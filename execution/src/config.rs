//! Coordinator configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for one [`crate::ExecutionCoordinator`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// How long a synchronous execution waits for its response
    pub execution_timeout: Duration,
    /// How long a resource lookup waits for the peer
    pub resource_timeout: Duration,
    /// Largest inbound frame accepted before the connection is dropped
    pub max_frame_bytes: usize,
    /// Idle time after which a dispatch worker thread exits
    pub worker_keep_alive: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(60),
            resource_timeout: Duration::from_secs(10),
            max_frame_bytes: 256 * 1024 * 1024,
            worker_keep_alive: Duration::from_secs(60),
        }
    }
}

impl CoordinatorConfig {
    /// Parses a configuration, filling absent fields with defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.execution_timeout, Duration::from_secs(60));
        assert_eq!(config.resource_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            CoordinatorConfig::from_json(r#"{"resource_timeout":{"secs":2,"nanos":0}}"#).unwrap();
        assert_eq!(config.resource_timeout, Duration::from_secs(2));
        assert_eq!(config.execution_timeout, Duration::from_secs(60));
        assert_eq!(config.max_frame_bytes, CoordinatorConfig::default().max_frame_bytes);
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        assert!(CoordinatorConfig::from_json("{\"max_frame_bytes\": \"lots\"}").is_err());
    }
}
