//! The Connection Manager (spec §4.1): owns the FSM, drives the discovery,
//! registration/reconnection, and heartbeat loops, and talks to the colony's
//! bootstrap/heartbeat HTTP service and to the local [`Device`].

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use coral_discovery::DiscoveryClient;
use coral_proto::{ColonyInfo, HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse};
use coral_wireguard::{AllowedIp, Device, Platform, PeerConfig, PublicKey};
use tracing::{info, instrument, warn};

use crate::config::AgentConfig;
use crate::connection::backoff::Backoff;
use crate::connection::endpoint::get_colony_endpoint;
use crate::connection::state::{ConnectionState, SharedState};
use crate::connection::trigger::{self, Trigger, TriggerListener};
use crate::error::{AgentError, Result};

/// Wire protocol version advertised on `Register`.
const PROTOCOL_VERSION: u32 = 1;

/// The interval the reconnection loop wakes up at even without a trigger
/// (spec §4.1: "every 5 s" fallback poll).
const RECONNECT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Drives an agent's connection to its colony end to end. Cheap to share: all
/// mutable state lives behind the locks owned by [`SharedState`] and the two
/// backoffs, so a single instance is wrapped in `Arc` and handed to three
/// background tasks.
pub struct ConnectionManager<P: Platform> {
    config: AgentConfig,
    state: Arc<SharedState>,
    discovery: Arc<dyn DiscoveryClient>,
    device: Arc<Device<P>>,
    http: reqwest::Client,
    colony_info: std::sync::Mutex<Option<ColonyInfo>>,
    reconnect_trigger: Trigger,
    reconnect_listener: tokio::sync::Mutex<TriggerListener>,
    registration_backoff: tokio::sync::Mutex<Backoff>,
    discovery_backoff: tokio::sync::Mutex<Backoff>,
}

impl<P: Platform> ConnectionManager<P> {
    /// Builds a manager in `waiting_discovery` (no colony info has been
    /// looked up yet).
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: AgentConfig, discovery: Arc<dyn DiscoveryClient>, device: Arc<Device<P>>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?;
        let (reconnect_trigger, reconnect_listener) = trigger::channel();
        Ok(Self {
            config,
            state: Arc::new(SharedState::new(false)),
            discovery,
            device,
            http,
            colony_info: std::sync::Mutex::new(None),
            reconnect_trigger,
            reconnect_listener: tokio::sync::Mutex::new(reconnect_listener),
            registration_backoff: tokio::sync::Mutex::new(Backoff::registration()),
            discovery_backoff: tokio::sync::Mutex::new(Backoff::discovery()),
        })
    }

    #[must_use]
    pub fn get_state(&self) -> ConnectionState {
        self.state.get_state()
    }

    #[must_use]
    pub fn get_assigned_ip(&self) -> Option<Ipv4Addr> {
        self.state.get_assigned_ip()
    }

    fn colony_info_snapshot(&self) -> Option<ColonyInfo> {
        self.colony_info.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// `LookupColony`. On success, caches the result and advances
    /// `waiting_discovery` → `unregistered`.
    #[instrument(skip(self))]
    pub async fn attempt_discovery(&self) -> bool {
        match self.discovery.lookup_colony(&self.config.colony_mesh_id).await {
            Ok(info) => {
                *self.colony_info.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(info);
                self.state.on_discovery_success();
                info!("colony discovered");
                true
            }
            Err(err) => {
                warn!(error = %err, "colony lookup failed");
                false
            }
        }
    }

    /// `unregistered` → `registering` → `registered`. A no-op (returns `Ok`
    /// without contacting anything) unless the FSM is currently
    /// `unregistered`.
    #[instrument(skip(self))]
    pub async fn attempt_registration(&self) -> Result<()> {
        if !self.state.begin_registering() {
            return Ok(());
        }
        let result = self.do_register().await;
        if result.is_err() {
            self.state.on_register_failed();
        }
        result
    }

    async fn do_register(&self) -> Result<()> {
        let colony = self.colony_info_snapshot().ok_or(AgentError::NoEndpoint)?;
        let base = bootstrap_base_url(&colony).ok_or(AgentError::NoEndpoint)?;

        let request = RegisterRequest {
            agent_id: self.config.agent_id.clone(),
            colony_id: self.config.colony_mesh_id.clone(),
            colony_secret: self.config.colony_secret.clone(),
            wireguard_pubkey: self.device.public_key().to_base64(),
            services: self.config.services.clone(),
            runtime_context: self.config.runtime_context.clone(),
            protocol_version: PROTOCOL_VERSION,
        };

        let response: RegisterResponse =
            self.http.post(format!("{base}/mesh/register")).json(&request).send().await?.json().await?;

        match response {
            RegisterResponse::Accepted { assigned_ip, mesh_subnet, .. } => {
                let ip: Ipv4Addr = assigned_ip
                    .parse()
                    .map_err(|_| AgentError::Proto(coral_proto::ProtoError::Decoding("bad assigned_ip".into())))?;
                self.device.reassign_address(IpAddr::V4(ip)).await?;
                self.install_colony_peer(&colony).await?;
                self.state.on_register_accepted(ip, mesh_subnet);
                self.registration_backoff.lock().await.reset();
                info!(%ip, "registration accepted");
                Ok(())
            }
            RegisterResponse::Rejected { reason } => Err(AgentError::RegistrationRejected(reason)),
        }
    }

    /// Programs the colony as a WireGuard peer, selecting its endpoint via
    /// [`get_colony_endpoint`].
    async fn install_colony_peer(&self, colony: &ColonyInfo) -> Result<()> {
        let pubkey = PublicKey::from_base64(&colony.colony_pubkey)?;
        let allowed_ip = AllowedIp::from_cidr(&format!("{}/32", colony.mesh_ipv4))?;
        let last_successful = self.state.get_last_successful_endpoint();
        let endpoint = get_colony_endpoint(colony, last_successful.as_ref());

        let mut peer = PeerConfig::new(pubkey).with_allowed_ip(allowed_ip).with_persistent_keepalive(25);
        if let Some(endpoint) = endpoint.clone() {
            peer = peer.with_endpoint(endpoint);
        }
        self.device.add_peer(peer).await?;
        self.state.set_current_endpoint(endpoint);
        Ok(())
    }

    /// Sends one `Heartbeat` and applies its result to the FSM.
    #[instrument(skip(self))]
    pub async fn heartbeat_once(&self) -> Result<()> {
        let colony = self.colony_info_snapshot().ok_or(AgentError::NoEndpoint)?;
        let base = mesh_heartbeat_base_url(&colony);
        let request = HeartbeatRequest::healthy(self.config.agent_id.clone());

        let response: HeartbeatResponse =
            self.http.post(format!("{base}/mesh/heartbeat")).json(&request).send().await?.json().await?;

        if response.ok {
            let endpoint = self.state.get_current_endpoint();
            self.state.on_heartbeat_success(endpoint);
            Ok(())
        } else {
            Err(AgentError::HeartbeatRejected)
        }
    }

    /// Runs until a colony lookup succeeds, then fires the reconnection
    /// trigger and exits; a no-op if discovery already succeeded.
    pub fn start_discovery_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if self.state.get_state() != ConnectionState::WaitingDiscovery {
                    return;
                }
                if self.attempt_discovery().await {
                    self.reconnect_trigger.fire();
                    return;
                }
                let delay = self.discovery_backoff.lock().await.next_delay();
                tokio::time::sleep(delay).await;
            }
        })
    }

    /// Sends a heartbeat on every tick while `registered` or `healthy`; the
    /// first heartbeat for a new registration fires as soon as this tick
    /// lands rather than waiting a full interval.
    pub fn start_heartbeat_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if matches!(self.state.get_state(), ConnectionState::Registered | ConnectionState::Healthy) {
                    if let Err(err) = self.heartbeat_once().await {
                        warn!(error = %err, "heartbeat failed");
                        if self.state.on_heartbeat_failure() {
                            self.reconnect_trigger.fire();
                        }
                    }
                }
                tokio::time::sleep(self.config.heartbeat_interval).await;
            }
        })
    }

    /// Wakes on the reconnection trigger or every [`RECONNECT_POLL_INTERVAL`],
    /// and attempts registration if and only if the FSM is `unregistered`.
    pub fn start_reconnection_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                {
                    let mut listener = self.reconnect_listener.lock().await;
                    tokio::select! {
                        () = listener.notified() => {}
                        () = tokio::time::sleep(RECONNECT_POLL_INTERVAL) => {}
                    }
                }
                if self.state.get_state() == ConnectionState::Unregistered {
                    if let Err(err) = self.attempt_registration().await {
                        warn!(error = %err, "registration attempt failed");
                        let delay = self.registration_backoff.lock().await.next_delay();
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }
}

/// The colony's bootstrap HTTP base URL, used only for `Register`: the first
/// endpoint with a non-empty host, at [`ColonyInfo::effective_connect_port`].
/// This is a pre-tunnel address, reachable before the agent has a WireGuard
/// peer configured for the colony at all.
fn bootstrap_base_url(colony: &ColonyInfo) -> Option<String> {
    let host = colony.endpoints.iter().map(|hp| hp.host.as_str()).find(|h| !h.is_empty())?;
    Some(format!("http://{host}:{port}", port = colony.effective_connect_port()))
}

/// The colony's mesh (tunnel) HTTP base URL, used for `Heartbeat` once the
/// agent is registered and the colony peer is programmed: `colony_mesh_ipv4`
/// at [`ColonyInfo::effective_connect_port`], reached over the WireGuard
/// tunnel rather than the pre-tunnel bootstrap endpoint.
fn mesh_heartbeat_base_url(colony: &ColonyInfo) -> String {
    format!("http://{}:{}", colony.mesh_ipv4, colony.effective_connect_port())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use coral_discovery::DiscoveryError;
    use coral_proto::{AgentId, ColonyId, HostPort, RejectReason};
    use coral_wireguard::platform::FakePlatform;
    use coral_wireguard::{DeviceConfig, PrivateKey};
    use std::collections::HashMap;

    fn test_colony(endpoints: Vec<HostPort>) -> ColonyInfo {
        ColonyInfo {
            colony_id: ColonyId::new("mesh-1").unwrap(),
            colony_pubkey: PrivateKey::generate().public_key().to_base64(),
            mesh_ipv4: "10.42.0.1".into(),
            endpoints,
            observed_endpoints: vec![],
            connect_port: 0,
            metadata: HashMap::new(),
            relays: vec![],
        }
    }

    fn test_config() -> AgentConfig {
        AgentConfig::new(
            AgentId::new("agent-a").unwrap(),
            ColonyId::new("mesh-1").unwrap(),
            "s3cr3t",
            PrivateKey::generate(),
        )
    }

    fn test_device() -> Arc<Device<FakePlatform>> {
        Arc::new(Device::new_device(DeviceConfig::new(PrivateKey::generate()), FakePlatform::new()))
    }

    struct FakeDiscovery {
        colony: std::sync::Mutex<Option<ColonyInfo>>,
    }

    #[async_trait::async_trait]
    impl DiscoveryClient for FakeDiscovery {
        async fn lookup_colony(&self, _mesh_id: &ColonyId) -> coral_discovery::Result<ColonyInfo> {
            self.colony
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| DiscoveryError::UnknownColony("mesh-1".into()))
        }

        async fn lookup_agent(&self, _agent_id: &AgentId) -> coral_discovery::Result<Vec<HostPort>> {
            Ok(vec![])
        }

        async fn register_agent(
            &self,
            _agent_id: &AgentId,
            _mesh_id: &ColonyId,
            _pubkey: &str,
            _observed_endpoint: Option<HostPort>,
            _metadata: HashMap<String, String>,
        ) -> coral_discovery::Result<coral_proto::RegisterAgentResponse> {
            Ok(coral_proto::RegisterAgentResponse { success: true, ttl_secs: 60 })
        }

        async fn request_relay(
            &self,
            _mesh_id: &ColonyId,
            _agent_pubkey: &str,
            _colony_pubkey: &str,
        ) -> coral_discovery::Result<coral_proto::RequestRelayResponse> {
            Err(DiscoveryError::NoRelayAvailable("none configured".into()))
        }
    }

    #[tokio::test]
    async fn discovery_success_transitions_to_unregistered() {
        let discovery = Arc::new(FakeDiscovery { colony: std::sync::Mutex::new(Some(test_colony(vec![]))) });
        let manager = ConnectionManager::new(test_config(), discovery, test_device()).unwrap();
        assert_eq!(manager.get_state(), ConnectionState::WaitingDiscovery);
        assert!(manager.attempt_discovery().await);
        assert_eq!(manager.get_state(), ConnectionState::Unregistered);
    }

    #[tokio::test]
    async fn discovery_failure_leaves_state_unchanged() {
        let discovery = Arc::new(FakeDiscovery { colony: std::sync::Mutex::new(None) });
        let manager = ConnectionManager::new(test_config(), discovery, test_device()).unwrap();
        assert!(!manager.attempt_discovery().await);
        assert_eq!(manager.get_state(), ConnectionState::WaitingDiscovery);
    }

    #[tokio::test]
    async fn registration_is_noop_before_discovery() {
        let discovery = Arc::new(FakeDiscovery { colony: std::sync::Mutex::new(None) });
        let manager = ConnectionManager::new(test_config(), discovery, test_device()).unwrap();
        manager.attempt_registration().await.unwrap();
        assert_eq!(manager.get_state(), ConnectionState::WaitingDiscovery);
    }

    async fn spawn_fake_colony(accept: bool) -> String {
        let app = Router::new()
            .route(
                "/mesh/register",
                post(move |Json(_req): Json<RegisterRequest>| async move {
                    let body = if accept {
                        RegisterResponse::accepted("10.42.0.2", "10.42.0.0/16", vec![], chrono::Utc::now())
                    } else {
                        RegisterResponse::rejected(RejectReason::InvalidSecret)
                    };
                    Json(body)
                }),
            )
            .route(
                "/mesh/heartbeat",
                post(|Json(_req): Json<HeartbeatRequest>| async move { Json(HeartbeatResponse::ok()) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Builds a [`ColonyInfo`] pointing both the bootstrap `endpoints[]` and
    /// `mesh_ipv4`/`connect_port` at the fake colony server, since these
    /// tests have no real WireGuard tunnel for `mesh_ipv4` to be reached
    /// over — the same fake listener stands in for both the pre-tunnel
    /// bootstrap address `Register` uses and the post-tunnel mesh address
    /// `Heartbeat` uses.
    fn colony_at(base_url: &str) -> ColonyInfo {
        let addr: std::net::SocketAddr = base_url.trim_start_matches("http://").parse().unwrap();
        let mut colony = test_colony(vec![HostPort::new(addr.ip().to_string(), addr.port())]);
        colony.mesh_ipv4 = addr.ip().to_string();
        colony.connect_port = addr.port();
        colony
    }

    #[tokio::test]
    async fn accepted_registration_reaches_registered_with_assigned_ip() {
        let base_url = spawn_fake_colony(true).await;
        let colony = colony_at(&base_url);
        let discovery = Arc::new(FakeDiscovery { colony: std::sync::Mutex::new(Some(colony)) });
        let manager = ConnectionManager::new(test_config(), discovery, test_device()).unwrap();

        assert!(manager.attempt_discovery().await);
        manager.attempt_registration().await.unwrap();

        assert_eq!(manager.get_state(), ConnectionState::Registered);
        assert_eq!(manager.get_assigned_ip(), Some("10.42.0.2".parse().unwrap()));
    }

    #[tokio::test]
    async fn rejected_registration_returns_to_unregistered() {
        let base_url = spawn_fake_colony(false).await;
        let colony = colony_at(&base_url);
        let discovery = Arc::new(FakeDiscovery { colony: std::sync::Mutex::new(Some(colony)) });
        let manager = ConnectionManager::new(test_config(), discovery, test_device()).unwrap();

        assert!(manager.attempt_discovery().await);
        let err = manager.attempt_registration().await.unwrap_err();
        assert!(matches!(err, AgentError::RegistrationRejected(RejectReason::InvalidSecret)));
        assert_eq!(manager.get_state(), ConnectionState::Unregistered);
    }

    #[tokio::test]
    async fn heartbeat_after_registration_reaches_healthy() {
        let base_url = spawn_fake_colony(true).await;
        let colony = colony_at(&base_url);
        let discovery = Arc::new(FakeDiscovery { colony: std::sync::Mutex::new(Some(colony)) });
        let manager = ConnectionManager::new(test_config(), discovery, test_device()).unwrap();

        assert!(manager.attempt_discovery().await);
        manager.attempt_registration().await.unwrap();
        manager.heartbeat_once().await.unwrap();

        assert_eq!(manager.get_state(), ConnectionState::Healthy);
    }

    #[test]
    fn bootstrap_base_url_skips_empty_hosts_and_uses_connect_port() {
        let colony = ColonyInfo {
            colony_id: ColonyId::new("mesh-1").unwrap(),
            colony_pubkey: "x".repeat(44),
            mesh_ipv4: "10.42.0.1".into(),
            endpoints: vec![HostPort::new("", 9000), HostPort::new("10.0.0.5", 9000)],
            observed_endpoints: vec![],
            connect_port: 9100,
            metadata: HashMap::new(),
            relays: vec![],
        };
        assert_eq!(bootstrap_base_url(&colony), Some("http://10.0.0.5:9100".to_string()));
    }

    #[test]
    fn mesh_heartbeat_base_url_uses_colony_mesh_ip_not_bootstrap_endpoint() {
        let colony = ColonyInfo {
            colony_id: ColonyId::new("mesh-1").unwrap(),
            colony_pubkey: "x".repeat(44),
            mesh_ipv4: "10.42.0.1".into(),
            endpoints: vec![HostPort::new("203.0.113.10", 9000)],
            observed_endpoints: vec![],
            connect_port: 9100,
            metadata: HashMap::new(),
            relays: vec![],
        };
        assert_eq!(mesh_heartbeat_base_url(&colony), "http://10.42.0.1:9100".to_string());
    }
}
