//! Agent configuration: identity, the colony to join, WireGuard parameters,
//! and the environment variables the core recognizes (spec §6).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use coral_proto::{AgentId, ColonyId};
use coral_wireguard::PrivateKey;

/// `CORAL_WIREGUARD_PORT` — overrides [`AgentConfig::wireguard_port`] when
/// set to an integer in `1..=65535`; otherwise an ephemeral port is used.
pub const ENV_WIREGUARD_PORT: &str = "CORAL_WIREGUARD_PORT";

/// `CORAL_STUN_SERVERS` — comma-separated `host:port` STUN servers used to
/// discover this agent's own public endpoint.
pub const ENV_STUN_SERVERS: &str = "CORAL_STUN_SERVERS";

/// `CORAL_ENABLE_RELAY` — `true`/`1` enables relay fallback via
/// `RequestRelay` when direct connectivity cannot be established.
pub const ENV_ENABLE_RELAY: &str = "CORAL_ENABLE_RELAY";

/// `CORAL_PUBLIC_ENDPOINT` — comma-separated hostnames this agent advertises
/// to Discovery as its own observed endpoint, bypassing STUN.
pub const ENV_PUBLIC_ENDPOINT: &str = "CORAL_PUBLIC_ENDPOINT";

/// Identity and network parameters for an agent, supplied by the caller
/// (provisioning tooling, a config file) rather than parsed from a CLI
/// here — CLI argument parsing and a general config-management subsystem
/// are out of scope.
#[derive(Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: AgentId,
    /// The mesh this agent joins; looked up via `LookupColony`.
    pub colony_mesh_id: ColonyId,
    pub colony_secret: String,
    pub wireguard_private_key: PrivateKey,
    /// `0` requests an ephemeral WireGuard UDP port.
    pub wireguard_port: u16,
    pub mtu: u16,
    pub services: Vec<String>,
    pub runtime_context: String,
    /// How often the heartbeat loop probes the colony.
    pub heartbeat_interval: Duration,
    /// STUN servers consulted to learn this agent's own public endpoint.
    pub stun_servers: Vec<String>,
    /// Whether to fall back to `RequestRelay` when direct connectivity fails.
    pub enable_relay: bool,
    /// Hostnames advertised to Discovery as this agent's own endpoint.
    pub public_endpoints: Vec<String>,
}

impl AgentConfig {
    #[must_use]
    pub fn new(
        agent_id: AgentId,
        colony_mesh_id: ColonyId,
        colony_secret: impl Into<String>,
        wireguard_private_key: PrivateKey,
    ) -> Self {
        Self {
            agent_id,
            colony_mesh_id,
            colony_secret: colony_secret.into(),
            wireguard_private_key,
            wireguard_port: coral_wireguard::EPHEMERAL_PORT,
            mtu: 1420,
            services: Vec::new(),
            runtime_context: String::new(),
            heartbeat_interval: Duration::from_secs(15),
            stun_servers: Vec::new(),
            enable_relay: false,
            public_endpoints: Vec::new(),
        }
    }

    /// Applies `CORAL_WIREGUARD_PORT`, `CORAL_STUN_SERVERS`,
    /// `CORAL_ENABLE_RELAY`, and `CORAL_PUBLIC_ENDPOINT` from the process
    /// environment, leaving unset or unparsable variables at their current
    /// value.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(port) = std::env::var(ENV_WIREGUARD_PORT) {
            if let Ok(port) = port.parse::<u16>() {
                if port != 0 {
                    self.wireguard_port = port;
                }
            }
        }
        if let Ok(servers) = std::env::var(ENV_STUN_SERVERS) {
            self.stun_servers =
                servers.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
        }
        if let Ok(enable) = std::env::var(ENV_ENABLE_RELAY) {
            self.enable_relay = matches!(enable.trim(), "true" | "1");
        }
        if let Ok(endpoints) = std::env::var(ENV_PUBLIC_ENDPOINT) {
            self.public_endpoints =
                endpoints.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
        }
        self
    }

    /// Loads an agent configuration from a JSON file, analogous to the
    /// donor's `NodeConfig::load`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::AgentError::ConfigIo`] if the file cannot be
    /// read, or [`crate::error::AgentError::ConfigParse`] if its contents
    /// are not valid JSON.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Saves this configuration to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::AgentError::ConfigIo`] if the file cannot be
    /// written.
    pub fn save(&self, path: &Path) -> crate::error::Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
