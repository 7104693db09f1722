//! Colony configuration: identity, WireGuard parameters, and the RPC bind
//! address, plus the environment variables the core recognizes (spec §6).

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use coral_proto::ColonyId;
use coral_wireguard::PrivateKey;

/// `CORAL_WIREGUARD_PORT` — overrides [`ColonyConfig::wireguard_port`] when
/// set to an integer in `1..=65535`; otherwise an ephemeral port is used.
pub const ENV_WIREGUARD_PORT: &str = "CORAL_WIREGUARD_PORT";

/// `CORAL_PUBLIC_ENDPOINT` — comma-separated hostnames advertised to
/// Discovery as the colony's bootstrap endpoints.
pub const ENV_PUBLIC_ENDPOINT: &str = "CORAL_PUBLIC_ENDPOINT";

/// Identity and network parameters for a colony, supplied by the caller
/// (operator tooling, a config file) rather than parsed from a CLI here —
/// CLI argument parsing and a general config-management subsystem are out
/// of scope.
#[derive(Clone, Serialize, Deserialize)]
pub struct ColonyConfig {
    pub colony_id: ColonyId,
    pub colony_secret: String,
    pub wireguard_private_key: PrivateKey,
    pub mesh_ipv4: std::net::Ipv4Addr,
    pub mesh_subnet: Ipv4Net,
    /// `0` requests an ephemeral WireGuard UDP port.
    pub wireguard_port: u16,
    pub mtu: u16,
    /// Address the Mesh RPC service (`Register`/`Heartbeat`) binds to.
    pub bind_addr: SocketAddr,
    /// Hostnames advertised to Discovery as this colony's bootstrap endpoints.
    pub public_endpoints: Vec<String>,
    /// Maximum size, in bytes, of a single inbound RPC request body.
    pub max_message_size: usize,
    /// Consecutive oversized messages on one connection before it is dropped.
    pub max_violations: u32,
    /// A registered agent is reaped if `last_seen` is older than this.
    pub stale_after: Duration,
    /// How often the background reaper scans for stale registrations.
    pub stale_check_interval: Duration,
}

impl ColonyConfig {
    #[must_use]
    pub fn new(
        colony_id: ColonyId,
        colony_secret: impl Into<String>,
        wireguard_private_key: PrivateKey,
        mesh_ipv4: std::net::Ipv4Addr,
        mesh_subnet: Ipv4Net,
        bind_addr: SocketAddr,
    ) -> Self {
        Self {
            colony_id,
            colony_secret: colony_secret.into(),
            wireguard_private_key,
            mesh_ipv4,
            mesh_subnet,
            wireguard_port: coral_wireguard::EPHEMERAL_PORT,
            mtu: 1420,
            bind_addr,
            public_endpoints: Vec::new(),
            max_message_size: 64 * 1024,
            max_violations: 3,
            stale_after: Duration::from_secs(300),
            stale_check_interval: Duration::from_secs(60),
        }
    }

    /// Applies `CORAL_WIREGUARD_PORT` and `CORAL_PUBLIC_ENDPOINT` from the
    /// process environment, leaving unset or unparsable variables at their
    /// current value.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(port) = std::env::var(ENV_WIREGUARD_PORT) {
            if let Ok(port) = port.parse::<u16>() {
                if port != 0 {
                    self.wireguard_port = port;
                }
            }
        }
        if let Ok(endpoints) = std::env::var(ENV_PUBLIC_ENDPOINT) {
            self.public_endpoints =
                endpoints.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
        }
        self
    }

    /// Loads a colony configuration from a JSON file, analogous to the
    /// donor's `NodeConfig::load`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ColonyError::ConfigIo`] if the file cannot be
    /// read, or [`crate::error::ColonyError::ConfigParse`] if its contents
    /// are not valid JSON.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Saves this configuration to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ColonyError::ConfigIo`] if the file cannot be
    /// written.
    pub fn save(&self, path: &Path) -> crate::error::Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ColonyConfig {
        ColonyConfig::new(
            ColonyId::new("mesh-1").unwrap(),
            "s3cr3t",
            PrivateKey::generate(),
            "10.42.0.1".parse().unwrap(),
            "10.42.0.0/24".parse().unwrap(),
            "0.0.0.0:9000".parse().unwrap(),
        )
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = base_config();
        assert_eq!(cfg.wireguard_port, 0);
        assert_eq!(cfg.max_violations, 3);
        assert!(cfg.public_endpoints.is_empty());
    }

    #[test]
    fn env_overrides_parse_port_and_endpoints() {
        // SAFETY-free: std::env mutation is process-global; scope the test to
        // its own variable names and restore them to avoid cross-test flakiness.
        std::env::set_var(ENV_WIREGUARD_PORT, "41820");
        std::env::set_var(ENV_PUBLIC_ENDPOINT, "colony.example.com, 203.0.113.5");
        let cfg = base_config().with_env_overrides();
        std::env::remove_var(ENV_WIREGUARD_PORT);
        std::env::remove_var(ENV_PUBLIC_ENDPOINT);

        assert_eq!(cfg.wireguard_port, 41820);
        assert_eq!(cfg.public_endpoints, vec!["colony.example.com", "203.0.113.5"]);
    }

    #[test]
    fn invalid_env_port_is_ignored() {
        std::env::set_var(ENV_WIREGUARD_PORT, "not-a-port");
        let cfg = base_config().with_env_overrides();
        std::env::remove_var(ENV_WIREGUARD_PORT);
        assert_eq!(cfg.wireguard_port, 0);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let cfg = base_config();
        let file = tempfile::NamedTempFile::new().expect("temp file");
        cfg.save(file.path()).expect("save");
        let loaded = ColonyConfig::load(file.path()).expect("load");
        assert_eq!(loaded.colony_id, cfg.colony_id);
        assert_eq!(loaded.colony_secret, cfg.colony_secret);
        assert_eq!(loaded.mesh_subnet, cfg.mesh_subnet);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = ColonyConfig::load(std::path::Path::new("/nonexistent/colony.json")).unwrap_err();
        assert!(matches!(err, crate::error::ColonyError::ConfigIo(_)));
    }
}
