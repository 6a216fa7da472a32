use anyhow::{ensure, Result};

pub const DEFAULT_ENDPOINT_PATH: &str = "/ws";
pub const DEFAULT_TOPIC: &str = "/topic/public";
/// Payloads buffered per connection before deliveries to it start failing.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Rules applied by the dispatcher when an event arrives.
///
/// Every flag defaults to the permissive behavior of the legacy chat app.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Let `add-user` replace a username that is already bound.
    pub allow_rebind: bool,
    /// Reject `send-message` until the connection has announced a username.
    pub require_identification: bool,
    /// Reject `send-message` whose sender differs from the bound username.
    pub enforce_sender: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// HTTP path that accepts WebSocket upgrades.
    pub endpoint_path: String,
    /// Topic every identified connection is subscribed to.
    pub topic_name: String,
    pub outbound_capacity: usize,
    pub policy: DispatchPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            topic_name: DEFAULT_TOPIC.to_string(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            policy: DispatchPolicy::default(),
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.endpoint_path.starts_with('/'),
            "endpoint path must start with '/', got '{}'",
            self.endpoint_path
        );
        ensure!(
            self.endpoint_path != "/health",
            "endpoint path '/health' is reserved"
        );
        ensure!(
            !self.topic_name.trim().is_empty(),
            "topic name cannot be empty"
        );
        ensure!(
            self.outbound_capacity > 0,
            "outbound capacity must be at least 1"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RelayConfig::default();
        config.validate().expect("default config validates");
        assert_eq!(config.endpoint_path, "/ws");
        assert_eq!(config.topic_name, "/topic/public");
        assert_eq!(config.policy, DispatchPolicy::default());
    }

    #[test]
    fn rejects_relative_endpoint_and_zero_capacity() {
        let relative = RelayConfig {
            endpoint_path: "ws".into(),
            ..RelayConfig::default()
        };
        assert!(relative.validate().is_err());

        let no_room = RelayConfig {
            outbound_capacity: 0,
            ..RelayConfig::default()
        };
        assert!(no_room.validate().is_err());

        let blank_topic = RelayConfig {
            topic_name: "  ".into(),
            ..RelayConfig::default()
        };
        assert!(blank_topic.validate().is_err());
    }
}
