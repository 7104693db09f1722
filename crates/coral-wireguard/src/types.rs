//! Core types for WireGuard device and peer configuration.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WireGuardError};
use crate::keys::PublicKey;

/// An allowed IP address or network in CIDR notation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllowedIp {
    network: IpNet,
}

impl AllowedIp {
    #[must_use]
    pub fn new(network: IpNet) -> Self {
        Self { network }
    }

    #[must_use]
    pub fn network(&self) -> &IpNet {
        &self.network
    }

    /// # Errors
    ///
    /// Returns [`WireGuardError::InvalidCidr`] if `s` is not valid CIDR notation.
    pub fn from_cidr(s: &str) -> Result<Self> {
        let network = s
            .parse::<IpNet>()
            .map_err(|e| WireGuardError::InvalidCidr(format!("{s}: {e}")))?;
        Ok(Self { network })
    }

    #[must_use]
    pub fn to_cidr(&self) -> String {
        self.network.to_string()
    }
}

impl FromStr for AllowedIp {
    type Err = WireGuardError;
    fn from_str(s: &str) -> Result<Self> {
        Self::from_cidr(s)
    }
}

impl fmt::Display for AllowedIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.network)
    }
}

/// A WireGuard peer endpoint (`ip:port`, IPv4 literal after resolution).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    address: SocketAddr,
}

impl Endpoint {
    #[must_use]
    pub fn new(address: SocketAddr) -> Self {
        Self { address }
    }

    #[must_use]
    pub fn from_ip_port(ip: IpAddr, port: u16) -> Self {
        Self { address: SocketAddr::new(ip, port) }
    }

    #[must_use]
    pub fn address(&self) -> &SocketAddr {
        &self.address
    }

    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.address.ip()
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.address.port()
    }

    #[must_use]
    pub fn is_loopback(&self) -> bool {
        self.address.ip().is_loopback()
    }
}

impl FromStr for Endpoint {
    type Err = WireGuardError;
    fn from_str(s: &str) -> Result<Self> {
        let address = s
            .parse::<SocketAddr>()
            .map_err(|e| WireGuardError::InvalidEndpoint(format!("{s}: {e}")))?;
        Ok(Self { address })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Configuration for a single WireGuard peer, as programmed via UAPI.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerConfig {
    pub public_key: PublicKey,
    pub allowed_ips: Vec<AllowedIp>,
    pub endpoint: Option<Endpoint>,
    /// Seconds between keepalive packets; `None`/`0` disables.
    pub persistent_keepalive: Option<u16>,
}

impl PeerConfig {
    #[must_use]
    pub fn new(public_key: PublicKey) -> Self {
        Self { public_key, allowed_ips: Vec::new(), endpoint: None, persistent_keepalive: None }
    }

    #[must_use]
    pub fn with_allowed_ip(mut self, ip: AllowedIp) -> Self {
        self.allowed_ips.push(ip);
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    #[must_use]
    pub fn with_persistent_keepalive(mut self, seconds: u16) -> Self {
        self.persistent_keepalive = Some(seconds);
        self
    }

    /// Validates the invariants `add_peer` requires: 44-char base64 public
    /// key (checked by `PublicKey` construction elsewhere) and a non-empty
    /// `allowed_ips` set.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::InvalidPeer`] if `allowed_ips` is empty.
    pub fn validate(&self) -> Result<()> {
        if self.allowed_ips.is_empty() {
            return Err(WireGuardError::InvalidPeer("allowed_ips must not be empty".into()));
        }
        Ok(())
    }
}

/// Runtime status of a programmed peer, as read back from the device.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerStatus {
    pub public_key: PublicKey,
    pub endpoint: Option<Endpoint>,
    pub allowed_ips: Vec<AllowedIp>,
    pub last_handshake_secs_ago: Option<u64>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Runtime status of a WireGuard device.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub interface_name: String,
    pub public_key: PublicKey,
    pub listen_port: u16,
    pub peers: Vec<PeerStatus>,
}
