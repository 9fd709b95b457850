//! Runtime configuration for the proxy.

use conduit_core::{DEFAULT_MESSAGING_TTL_MS, MAX_MESSAGING_TTL_MS};

/// Settings shared by the dispatcher and both managers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Slack added to the wire expiry of freshly originated messages.
    /// Never affects local timers.
    pub ttl_uplift_ms: u64,
    /// Ceiling for any messaging ttl, and the ttl used for subscriptions
    /// without expiry.
    pub max_messaging_ttl_ms: u64,
    /// Ttl of messages built without caller-supplied QoS, e.g. stop messages.
    pub default_messaging_ttl_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ttl_uplift_ms: 0,
            max_messaging_ttl_ms: MAX_MESSAGING_TTL_MS,
            default_messaging_ttl_ms: DEFAULT_MESSAGING_TTL_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_config_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.ttl_uplift_ms, 0);
        assert_eq!(config.max_messaging_ttl_ms, 2_592_000_000);
        assert_eq!(config.default_messaging_ttl_ms, 60_000);
    }
}
