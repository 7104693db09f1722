//! Local configuration types for the networked Discovery client.

use std::time::Duration;

/// Every Discovery RPC (`LookupColony`, `LookupAgent`, `RegisterAgent`,
/// `RequestRelay`) shares this per-call timeout (spec §4.5).
pub const DISCOVERY_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection details for [`crate::client::HttpDiscoveryClient`].
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// Base URL of the networked Discovery service, e.g. `http://discovery:9100`.
    pub base_url: String,
    /// Per-call timeout; defaults to [`DISCOVERY_CALL_TIMEOUT`].
    pub timeout: Duration,
}

impl DiscoveryConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), timeout: DISCOVERY_CALL_TIMEOUT }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_matches_spec() {
        let cfg = DiscoveryConfig::new("http://discovery:9100");
        assert_eq!(cfg.timeout, Duration::from_secs(10));
    }
}
