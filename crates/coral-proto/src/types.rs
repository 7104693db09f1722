//! Core data types shared between agent and colony.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of an agent, reused across restarts.
///
/// Unlike a freshly-generated session identifier, this is supplied by the
/// caller (configuration, persisted local state, or a provisioning system)
/// so the same agent reconnecting after a restart is recognized as the same
/// principal by the colony's registry and IP allocator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    /// Builds an `AgentId` from an owned string.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Validation`](crate::ProtoError::Validation) if the id is empty.
    pub fn new(id: impl Into<String>) -> Result<Self, crate::ProtoError> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::ProtoError::Validation("agent_id must not be empty".into()));
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for AgentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of a colony / mesh, opaque outside the control plane.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColonyId(String);

impl ColonyId {
    pub fn new(id: impl Into<String>) -> Result<Self, crate::ProtoError> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::ProtoError::Validation("colony_id must not be empty".into()));
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColonyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq<str> for ColonyId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Closed set of reasons a `Register` call can be rejected.
///
/// Never extend this without updating every caller that matches on it —
/// the set is part of the wire contract between agent and colony.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// `colony_id` did not match the colony's configured identity.
    WrongColony,
    /// `colony_secret` failed the constant-time comparison.
    InvalidSecret,
    /// `wireguard_pubkey` was empty or malformed.
    MissingWireguardPubkey,
    /// The IP allocator could not produce an address (pool exhausted or store failure).
    IpAllocationFailed,
    /// Adding the agent as a WireGuard peer failed; the allocated IP was rolled back.
    PeerAddFailed,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WrongColony => "wrong_colony",
            Self::InvalidSecret => "invalid_secret",
            Self::MissingWireguardPubkey => "missing_wireguard_pubkey",
            Self::IpAllocationFailed => "ip_allocation_failed",
            Self::PeerAddFailed => "peer_add_failed",
        };
        write!(f, "{s}")
    }
}

/// A `(host, port)` reachable over the public internet, or a STUN-observed
/// `(ip, port)` pair. Host may be a hostname for `endpoints[]` entries but is
/// always a literal IP for `observed_endpoints[]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Describes a relay a NAT-challenged agent or colony can fall back to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDescriptor {
    pub relay_id: String,
    pub endpoint: HostPort,
}

/// Information about a colony as returned by Discovery and cached by the agent.
///
/// `metadata["wireguard_port"]`, if present, overrides the default WireGuard
/// UDP port (51820) when no observed endpoint supplies one directly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColonyInfo {
    pub colony_id: ColonyId,
    pub colony_pubkey: String,
    pub mesh_ipv4: String,
    #[serde(default)]
    pub endpoints: Vec<HostPort>,
    #[serde(default)]
    pub observed_endpoints: Vec<HostPort>,
    /// TCP port for the bootstrap/heartbeat service. Zero means "use the default".
    #[serde(default)]
    pub connect_port: u16,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub relays: Vec<RelayDescriptor>,
}

impl ColonyInfo {
    /// The default bootstrap/heartbeat TCP port when `connect_port` is unset.
    pub const DEFAULT_CONNECT_PORT: u16 = 9000;

    #[must_use]
    pub fn effective_connect_port(&self) -> u16 {
        if self.connect_port == 0 {
            Self::DEFAULT_CONNECT_PORT
        } else {
            self.connect_port
        }
    }
}

/// A WireGuard peer as exchanged between agent and colony (not the full
/// in-process peer state owned by the device, just the wire-visible subset).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshPeerConfig {
    pub public_key: String,
    pub mesh_ip: String,
    pub endpoint: Option<String>,
    #[serde(default = "default_keepalive")]
    pub persistent_keepalive: Option<u16>,
    pub allowed_ips: Vec<String>,
}

fn default_keepalive() -> Option<u16> {
    Some(25)
}

impl MeshPeerConfig {
    #[must_use]
    pub fn new(public_key: impl Into<String>, mesh_ip: impl Into<String>) -> Self {
        let mesh_ip = mesh_ip.into();
        Self {
            public_key: public_key.into(),
            allowed_ips: vec![format!("{mesh_ip}/32")],
            mesh_ip,
            endpoint: None,
            persistent_keepalive: Some(25),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}
