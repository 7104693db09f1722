//! The Discovery client façade (spec §4.5): `LookupColony`, `LookupAgent`,
//! `RegisterAgent`, `RequestRelay`, each bound by a 10 s timeout.

use std::collections::HashMap;
use std::sync::Arc;

use coral_proto::{
    AgentId, ColonyId, ColonyInfo, HostPort, LookupAgentRequest, LookupAgentResponse,
    LookupColonyRequest, LookupColonyResponse, RegisterAgentRequest, RegisterAgentResponse,
    RequestRelayRequest, RequestRelayResponse,
};
use tracing::{instrument, warn};

use crate::error::{DiscoveryError, Result};
use crate::registry::DiscoveryRegistry;
use crate::types::DiscoveryConfig;

/// Everything the core depends on from Discovery. Both `coral-agent` and
/// `coral-colony` talk to this trait, not to a concrete backend, so the
/// in-process reference implementation can be swapped for a networked one
/// without touching either binary.
#[async_trait::async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// `LookupColony(mesh_id) -> ColonyInfo`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::UnknownColony`] or [`DiscoveryError::Timeout`].
    async fn lookup_colony(&self, mesh_id: &ColonyId) -> Result<ColonyInfo>;

    /// `LookupAgent(agent_id) -> {observed_endpoints[]}`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Timeout`] or a transport error.
    async fn lookup_agent(&self, agent_id: &AgentId) -> Result<Vec<HostPort>>;

    /// `RegisterAgent(agent_id, mesh_id, pubkey, observed_endpoint, metadata)
    /// -> {success, ttl}`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Timeout`] or a transport error.
    async fn register_agent(
        &self,
        agent_id: &AgentId,
        mesh_id: &ColonyId,
        pubkey: &str,
        observed_endpoint: Option<HostPort>,
        metadata: HashMap<String, String>,
    ) -> Result<RegisterAgentResponse>;

    /// `RequestRelay(mesh_id, agent_pubkey, colony_pubkey) ->
    /// {relay_endpoint, session_id, expires_at}`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::NoRelayAvailable`], [`DiscoveryError::Timeout`],
    /// or a transport error.
    async fn request_relay(
        &self,
        mesh_id: &ColonyId,
        agent_pubkey: &str,
        colony_pubkey: &str,
    ) -> Result<RequestRelayResponse>;
}

async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(crate::types::DISCOVERY_CALL_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(DiscoveryError::Timeout(crate::types::DISCOVERY_CALL_TIMEOUT)),
    }
}

/// In-process reference `DiscoveryClient`, backed by a [`DiscoveryRegistry`].
///
/// This is the implementation both binaries use out of the box so the mesh
/// is runnable end-to-end without standing up a separate Discovery service;
/// see [`HttpDiscoveryClient`] for talking to a real one.
#[derive(Clone)]
pub struct LocalDiscovery {
    registry: Arc<DiscoveryRegistry>,
}

impl LocalDiscovery {
    #[must_use]
    pub fn new(registry: Arc<DiscoveryRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl DiscoveryClient for LocalDiscovery {
    #[instrument(skip(self))]
    async fn lookup_colony(&self, mesh_id: &ColonyId) -> Result<ColonyInfo> {
        let registry = self.registry.clone();
        let mesh_id = mesh_id.clone();
        with_timeout(async move { registry.lookup_colony(&mesh_id) }).await
    }

    #[instrument(skip(self))]
    async fn lookup_agent(&self, agent_id: &AgentId) -> Result<Vec<HostPort>> {
        let registry = self.registry.clone();
        let agent_id = agent_id.clone();
        with_timeout(async move { Ok(registry.lookup_agent(&agent_id)) }).await
    }

    #[instrument(skip(self, metadata))]
    async fn register_agent(
        &self,
        agent_id: &AgentId,
        _mesh_id: &ColonyId,
        pubkey: &str,
        observed_endpoint: Option<HostPort>,
        metadata: HashMap<String, String>,
    ) -> Result<RegisterAgentResponse> {
        let registry = self.registry.clone();
        let agent_id = agent_id.clone();
        let pubkey = pubkey.to_string();
        with_timeout(async move {
            let ttl_secs = registry.register_agent(&agent_id, &pubkey, observed_endpoint, metadata);
            Ok(RegisterAgentResponse { success: true, ttl_secs })
        })
        .await
    }

    #[instrument(skip(self, agent_pubkey, colony_pubkey))]
    async fn request_relay(
        &self,
        mesh_id: &ColonyId,
        agent_pubkey: &str,
        colony_pubkey: &str,
    ) -> Result<RequestRelayResponse> {
        let _ = (agent_pubkey, colony_pubkey);
        let registry = self.registry.clone();
        let mesh_id = mesh_id.clone();
        with_timeout(async move {
            let (relay_endpoint, session_id, expires_at) = registry.request_relay(&mesh_id)?;
            Ok(RequestRelayResponse { relay_endpoint, session_id, expires_at })
        })
        .await
    }
}

/// `DiscoveryClient` over HTTP against a networked Discovery service,
/// swappable in for [`LocalDiscovery`] without touching `coral-agent` or
/// `coral-colony`.
pub struct HttpDiscoveryClient {
    http: reqwest::Client,
    config: DiscoveryConfig,
}

impl HttpDiscoveryClient {
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Transport`] if the underlying HTTP client
    /// cannot be built.
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DiscoveryError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    async fn post<Req: serde::Serialize, Resp: for<'de> serde::Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp> {
        let url = format!("{}{path}", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| DiscoveryError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Transport(format!(
                "{path} returned HTTP {}",
                response.status()
            )));
        }
        response.json().await.map_err(|e| DiscoveryError::Transport(e.to_string()))
    }
}

#[async_trait::async_trait]
impl DiscoveryClient for HttpDiscoveryClient {
    #[instrument(skip(self))]
    async fn lookup_colony(&self, mesh_id: &ColonyId) -> Result<ColonyInfo> {
        with_timeout(async {
            let resp: LookupColonyResponse = self
                .post("/discovery/lookup_colony", &LookupColonyRequest { mesh_id: mesh_id.clone() })
                .await?;
            Ok(resp.colony)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn lookup_agent(&self, agent_id: &AgentId) -> Result<Vec<HostPort>> {
        with_timeout(async {
            let resp: LookupAgentResponse = self
                .post("/discovery/lookup_agent", &LookupAgentRequest { agent_id: agent_id.clone() })
                .await?;
            Ok(resp.observed_endpoints)
        })
        .await
    }

    #[instrument(skip(self, metadata))]
    async fn register_agent(
        &self,
        agent_id: &AgentId,
        mesh_id: &ColonyId,
        pubkey: &str,
        observed_endpoint: Option<HostPort>,
        metadata: HashMap<String, String>,
    ) -> Result<RegisterAgentResponse> {
        let req = RegisterAgentRequest {
            agent_id: agent_id.clone(),
            mesh_id: mesh_id.clone(),
            pubkey: pubkey.to_string(),
            observed_endpoint,
            metadata,
        };
        with_timeout(async { self.post("/discovery/register_agent", &req).await }).await
    }

    #[instrument(skip(self, agent_pubkey, colony_pubkey))]
    async fn request_relay(
        &self,
        mesh_id: &ColonyId,
        agent_pubkey: &str,
        colony_pubkey: &str,
    ) -> Result<RequestRelayResponse> {
        let req = RequestRelayRequest {
            mesh_id: mesh_id.clone(),
            agent_pubkey: agent_pubkey.to_string(),
            colony_pubkey: colony_pubkey.to_string(),
        };
        with_timeout(async {
            warn!("contacting networked discovery for relay allocation");
            self.post("/discovery/request_relay", &req).await
        })
        .await
    }
}
