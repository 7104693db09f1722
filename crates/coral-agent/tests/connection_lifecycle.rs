//! End-to-end exercise of the connection manager against a fake colony HTTP
//! service and an in-process discovery stub, driven entirely through
//! `coral-agent`'s public API.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::routing::post;
use axum::{Json, Router};

use coral_agent::config::AgentConfig;
use coral_agent::connection::{ConnectionManager, ConnectionState};
use coral_discovery::DiscoveryClient;
use coral_proto::{
    AgentId, ColonyId, ColonyInfo, HeartbeatRequest, HeartbeatResponse, HostPort, RegisterRequest,
    RegisterResponse,
};
use coral_wireguard::platform::FakePlatform;
use coral_wireguard::{Device, DeviceConfig, PrivateKey};

struct StaticDiscovery {
    colony: ColonyInfo,
}

#[async_trait]
impl DiscoveryClient for StaticDiscovery {
    async fn lookup_colony(&self, _mesh_id: &ColonyId) -> coral_discovery::Result<ColonyInfo> {
        Ok(self.colony.clone())
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
        Err(coral_discovery::DiscoveryError::NoRelayAvailable("no relays in this test".into()))
    }
}

async fn spawn_fake_colony() -> String {
    let app = Router::new()
        .route(
            "/mesh/register",
            post(|Json(_req): Json<RegisterRequest>| async move {
                Json(RegisterResponse::accepted("10.42.0.7", "10.42.0.0/16", vec![], chrono::Utc::now()))
            }),
        )
        .route(
            "/mesh/heartbeat",
            post(|Json(_req): Json<HeartbeatRequest>| async move { Json(HeartbeatResponse::ok()) }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind fake colony");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake colony server");
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn agent_reaches_healthy_via_discovery_register_heartbeat() {
    let base_url = spawn_fake_colony().await;
    let addr: std::net::SocketAddr = base_url.trim_start_matches("http://").parse().unwrap();

    // `mesh_ipv4`/`connect_port` point at the same fake listener as
    // `endpoints[]`: there is no real WireGuard tunnel in this test, so the
    // one fake server stands in for both the pre-tunnel bootstrap address
    // `Register` uses and the post-tunnel mesh address `Heartbeat` uses.
    let colony = ColonyInfo {
        colony_id: ColonyId::new("mesh-1").unwrap(),
        colony_pubkey: PrivateKey::generate().public_key().to_base64(),
        mesh_ipv4: addr.ip().to_string(),
        endpoints: vec![HostPort::new(addr.ip().to_string(), addr.port())],
        observed_endpoints: vec![],
        connect_port: addr.port(),
        metadata: HashMap::new(),
        relays: vec![],
    };

    let config = AgentConfig::new(
        AgentId::new("agent-a").unwrap(),
        ColonyId::new("mesh-1").unwrap(),
        "s3cr3t",
        PrivateKey::generate(),
    );
    let device = Arc::new(Device::new_device(DeviceConfig::new(PrivateKey::generate()), FakePlatform::new()));
    device.start().await.expect("device start");

    let discovery = Arc::new(StaticDiscovery { colony });
    let manager = Arc::new(ConnectionManager::new(config, discovery, device).expect("manager"));

    assert_eq!(manager.get_state(), ConnectionState::WaitingDiscovery);
    assert!(manager.attempt_discovery().await);
    assert_eq!(manager.get_state(), ConnectionState::Unregistered);

    manager.attempt_registration().await.expect("registration accepted");
    assert_eq!(manager.get_state(), ConnectionState::Registered);
    assert_eq!(manager.get_assigned_ip(), Some("10.42.0.7".parse().unwrap()));

    manager.heartbeat_once().await.expect("heartbeat accepted");
    assert_eq!(manager.get_state(), ConnectionState::Healthy);

    // A second attempt_registration is a no-op once already registered.
    manager.attempt_registration().await.expect("no-op registration");
    assert_eq!(manager.get_state(), ConnectionState::Healthy);
}
