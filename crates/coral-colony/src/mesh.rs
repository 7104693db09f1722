//! The colony's `Register`/`Heartbeat` mesh RPC handlers (spec §4.2).

use std::net::IpAddr;
use std::sync::Arc;

use coral_discovery::DiscoveryClient;
use coral_network::IpAllocator;
use coral_proto::{
    HeartbeatRequest, HeartbeatResponse, MeshPeerConfig, RegisterRequest, RegisterResponse, RejectReason,
};
use coral_wireguard::{AllowedIp, Device, Endpoint, Platform, PeerConfig, PublicKey};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::config::ColonyConfig;
use crate::registry::AgentRegistry;

/// Ties together the allocator, WireGuard device, Discovery client, and
/// agent registry to answer `Register` and `Heartbeat` calls.
pub struct MeshHandler<P: Platform> {
    config: Arc<ColonyConfig>,
    device: Arc<Device<P>>,
    allocator: Arc<IpAllocator>,
    discovery: Arc<dyn DiscoveryClient>,
    registry: Arc<AgentRegistry>,
}

impl<P: Platform> MeshHandler<P> {
    #[must_use]
    pub fn new(
        config: Arc<ColonyConfig>,
        device: Arc<Device<P>>,
        allocator: Arc<IpAllocator>,
        discovery: Arc<dyn DiscoveryClient>,
        registry: Arc<AgentRegistry>,
    ) -> Self {
        Self { config, device, allocator, discovery, registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Runs the `Register` algorithm (spec §4.2, steps 1-8). `caller_host` is
    /// the RPC framework's notion of the caller's remote address; it is the
    /// same-host tiebreak used when selecting a peer endpoint.
    pub async fn register(&self, req: RegisterRequest, caller_host: Option<String>) -> RegisterResponse {
        if req.colony_id != self.config.colony_id {
            info!(agent_id = %req.agent_id, "rejecting Register: wrong colony");
            return RegisterResponse::rejected(RejectReason::WrongColony);
        }
        if !secrets_match(&req.colony_secret, &self.config.colony_secret) {
            warn!(agent_id = %req.agent_id, "rejecting Register: invalid secret");
            return RegisterResponse::rejected(RejectReason::InvalidSecret);
        }
        if req.wireguard_pubkey.is_empty() {
            info!(agent_id = %req.agent_id, "rejecting Register: missing wireguard pubkey");
            return RegisterResponse::rejected(RejectReason::MissingWireguardPubkey);
        }

        let assigned_ip = match self.allocator.allocate(req.agent_id.as_str()) {
            Ok(ip) => ip,
            Err(e) => {
                warn!(agent_id = %req.agent_id, error = %e, "rejecting Register: allocation failed");
                return RegisterResponse::rejected(RejectReason::IpAllocationFailed);
            }
        };

        let public_key = match PublicKey::from_base64(&req.wireguard_pubkey) {
            Ok(key) => key,
            Err(e) => {
                warn!(agent_id = %req.agent_id, error = %e, "rejecting Register: malformed pubkey");
                let _ = self.allocator.release_by_agent(req.agent_id.as_str());
                return RegisterResponse::rejected(RejectReason::MissingWireguardPubkey);
            }
        };

        let endpoint = self.select_endpoint(&req.agent_id, caller_host.as_deref()).await;

        let allowed_ip = match AllowedIp::from_cidr(&format!("{assigned_ip}/32")) {
            Ok(ip) => ip,
            Err(e) => {
                warn!(agent_id = %req.agent_id, error = %e, "rejecting Register: bad allocated address");
                let _ = self.allocator.release_by_agent(req.agent_id.as_str());
                return RegisterResponse::rejected(RejectReason::PeerAddFailed);
            }
        };

        let mut peer = PeerConfig::new(public_key).with_allowed_ip(allowed_ip).with_persistent_keepalive(25);
        if let Some(endpoint) = &endpoint {
            peer = peer.with_endpoint(endpoint.clone());
        }

        if let Err(e) = self.device.add_peer(peer).await {
            warn!(agent_id = %req.agent_id, error = %e, "rejecting Register: peer add failed, rolling back allocation");
            let _ = self.allocator.release_by_agent(req.agent_id.as_str());
            return RegisterResponse::rejected(RejectReason::PeerAddFailed);
        }

        let wire_peer = MeshPeerConfig {
            public_key: req.wireguard_pubkey.clone(),
            mesh_ip: assigned_ip.to_string(),
            endpoint: endpoint.as_ref().map(std::string::ToString::to_string),
            persistent_keepalive: Some(25),
            allowed_ips: vec![format!("{assigned_ip}/32")],
        };

        let registered_at = self.registry.upsert(req.agent_id.clone(), wire_peer);
        let peers = self.registry.peers_excluding(&req.agent_id);

        info!(agent_id = %req.agent_id, %assigned_ip, "agent registered");
        RegisterResponse::accepted(assigned_ip.to_string(), self.config.mesh_subnet.to_string(), peers, registered_at)
    }

    /// Selects the agent's WireGuard endpoint per spec §4.2 step 5: prefer
    /// the observed endpoint matching the caller's host (loopback included in
    /// that case), otherwise the first non-loopback entry, otherwise `None`.
    async fn select_endpoint(&self, agent_id: &coral_proto::AgentId, caller_host: Option<&str>) -> Option<Endpoint> {
        let observed = match self.discovery.lookup_agent(agent_id).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!(%agent_id, error = %e, "discovery lookup_agent failed, registering without endpoint");
                Vec::new()
            }
        };

        let chosen = select_peer_host_port(&observed, caller_host)?;
        let ip: IpAddr = chosen.host.parse().ok()?;
        Some(Endpoint::from_ip_port(ip, chosen.port))
    }

    /// Runs the `Heartbeat` algorithm (spec §4.2): rejects unknown or empty
    /// `agent_id`, otherwise touches `last_seen` and returns `ok=true`.
    #[must_use]
    pub fn heartbeat(&self, req: HeartbeatRequest) -> HeartbeatResponse {
        if self.registry.touch(&req.agent_id) {
            let _ = self.allocator.update_last_seen(req.agent_id.as_str());
            HeartbeatResponse::ok()
        } else {
            warn!(agent_id = %req.agent_id, "rejecting Heartbeat: unknown agent");
            HeartbeatResponse::rejected()
        }
    }
}

fn secrets_match(provided: &str, configured: &str) -> bool {
    provided.as_bytes().ct_eq(configured.as_bytes()).into()
}

fn is_loopback_host(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

fn select_peer_host_port(observed: &[coral_proto::HostPort], caller_host: Option<&str>) -> Option<coral_proto::HostPort> {
    if let Some(caller) = caller_host {
        if let Some(hp) = observed.iter().find(|hp| hp.host == caller) {
            return Some(hp.clone());
        }
    }
    observed.iter().find(|hp| !is_loopback_host(&hp.host)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use coral_discovery::{DiscoveryRegistry, LocalDiscovery};
    use coral_network::InMemoryStore;
    use coral_proto::{AgentId, ColonyId, HostPort};
    use coral_wireguard::{DeviceConfig, FakePlatform, PrivateKey};

    fn handler() -> MeshHandler<FakePlatform> {
        let config = Arc::new(ColonyConfig::new(
            ColonyId::new("mesh-1").unwrap(),
            "s3cr3t",
            PrivateKey::generate(),
            "10.42.0.1".parse().unwrap(),
            "10.42.0.0/24".parse().unwrap(),
            "0.0.0.0:9000".parse().unwrap(),
        ));
        let device_config = DeviceConfig::new(PrivateKey::generate());
        let device = Arc::new(Device::new_device(device_config, FakePlatform::new()));
        let allocator = Arc::new(IpAllocator::new(config.mesh_subnet, Box::new(InMemoryStore::new())).unwrap());
        let discovery = Arc::new(LocalDiscovery::new(Arc::new(DiscoveryRegistry::new())));
        let registry = Arc::new(AgentRegistry::new());
        MeshHandler::new(config, device, allocator, discovery, registry)
    }

    fn valid_request(agent: &str) -> RegisterRequest {
        RegisterRequest {
            agent_id: AgentId::new(agent).unwrap(),
            colony_id: ColonyId::new("mesh-1").unwrap(),
            colony_secret: "s3cr3t".into(),
            wireguard_pubkey: PrivateKey::generate().public_key().to_base64(),
            services: vec![],
            runtime_context: String::new(),
            protocol_version: 1,
        }
    }

    #[tokio::test]
    async fn register_happy_path_accepts_and_allocates() {
        let h = handler();
        h.device.start().await.unwrap();
        let resp = h.register(valid_request("agent-a"), None).await;
        match resp {
            RegisterResponse::Accepted { assigned_ip, .. } => assert_eq!(assigned_ip, "10.42.0.2"),
            RegisterResponse::Rejected { reason } => panic!("unexpected rejection: {reason}"),
        }
        assert_eq!(h.registry.len(), 1);
    }

    #[tokio::test]
    async fn register_wrong_colony_is_rejected() {
        let h = handler();
        h.device.start().await.unwrap();
        let mut req = valid_request("agent-a");
        req.colony_id = ColonyId::new("other-mesh").unwrap();
        let resp = h.register(req, None).await;
        assert!(matches!(resp, RegisterResponse::Rejected { reason: RejectReason::WrongColony }));
        assert_eq!(h.allocator.allocated_count(), 0);
    }

    #[tokio::test]
    async fn register_wrong_secret_is_rejected_and_consumes_no_ip() {
        let h = handler();
        h.device.start().await.unwrap();
        let mut req = valid_request("agent-a");
        req.colony_secret = "wrong".into();
        let resp = h.register(req, None).await;
        assert!(matches!(resp, RegisterResponse::Rejected { reason: RejectReason::InvalidSecret }));
        assert_eq!(h.allocator.allocated_count(), 0);
    }

    #[tokio::test]
    async fn register_missing_pubkey_is_rejected() {
        let h = handler();
        h.device.start().await.unwrap();
        let mut req = valid_request("agent-a");
        req.wireguard_pubkey.clear();
        let resp = h.register(req, None).await;
        assert!(matches!(resp, RegisterResponse::Rejected { reason: RejectReason::MissingWireguardPubkey }));
    }

    #[tokio::test]
    async fn register_is_idempotent_for_reconnecting_agent() {
        let h = handler();
        h.device.start().await.unwrap();
        let first = h.register(valid_request("agent-a"), None).await;
        let second = h.register(valid_request("agent-a"), None).await;
        assert_eq!(first.ip_subnet_encoded(), second.ip_subnet_encoded());
        assert_eq!(h.allocator.allocated_count(), 1);
    }

    #[tokio::test]
    async fn register_peers_response_excludes_caller() {
        let h = handler();
        h.device.start().await.unwrap();
        h.register(valid_request("agent-a"), None).await;
        let second = h.register(valid_request("agent-b"), None).await;
        match second {
            RegisterResponse::Accepted { peers, .. } => assert_eq!(peers.len(), 1),
            RegisterResponse::Rejected { reason } => panic!("unexpected rejection: {reason}"),
        }
    }

    #[tokio::test]
    async fn heartbeat_unknown_agent_rejected() {
        let h = handler();
        let resp = h.heartbeat(HeartbeatRequest::healthy(AgentId::new("ghost").unwrap()));
        assert!(!resp.ok);
    }

    #[tokio::test]
    async fn heartbeat_known_agent_succeeds() {
        let h = handler();
        h.device.start().await.unwrap();
        h.register(valid_request("agent-a"), None).await;
        let resp = h.heartbeat(HeartbeatRequest::healthy(AgentId::new("agent-a").unwrap()));
        assert!(resp.ok);
    }

    #[test]
    fn select_peer_host_port_prefers_caller_host_match() {
        let observed =
            vec![HostPort::new("127.0.0.1", 9000), HostPort::new("203.0.113.10", 41820)];
        let chosen = select_peer_host_port(&observed, Some("127.0.0.1")).unwrap();
        assert_eq!(chosen.host, "127.0.0.1");
    }

    #[test]
    fn select_peer_host_port_skips_loopback_without_caller_match() {
        let observed =
            vec![HostPort::new("127.0.0.1", 9000), HostPort::new("203.0.113.10", 41820)];
        let chosen = select_peer_host_port(&observed, Some("198.51.100.2")).unwrap();
        assert_eq!(chosen.host, "203.0.113.10");
    }

    #[test]
    fn select_peer_host_port_none_when_only_loopback_and_no_match() {
        let observed = vec![HostPort::new("127.0.0.1", 9000)];
        assert!(select_peer_host_port(&observed, Some("198.51.100.2")).is_none());
    }
}
