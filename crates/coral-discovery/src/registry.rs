//! In-memory reference Discovery registry: colonies, agent observed
//! endpoints, and round-robin relay selection.
//!
//! This is the donor's registry/load-balancer shape (a map guarded by a
//! lock, round-robin selection via an atomic counter) adapted from
//! service-mesh endpoint selection to the mesh control plane's narrower
//! Discovery contract (§4.5): colonies and agents register themselves, and
//! callers look up what was registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{Duration as ChronoDuration, Utc};
use coral_proto::{AgentId, ColonyId, ColonyInfo, HostPort, RelayDescriptor};
use uuid::Uuid;

use crate::error::{DiscoveryError, Result};

/// What the registry remembers about an agent between `RegisterAgent` calls.
#[derive(Clone, Debug)]
struct AgentRecord {
    pubkey: String,
    observed_endpoints: Vec<HostPort>,
    #[allow(dead_code)]
    metadata: HashMap<String, String>,
}

const MAX_OBSERVED_ENDPOINTS_PER_AGENT: usize = 8;
const DEFAULT_REGISTRATION_TTL_SECS: u64 = 300;
const RELAY_SESSION_TTL_SECS: i64 = 3600;

/// In-memory registry backing [`crate::client::LocalDiscovery`].
#[derive(Default)]
pub struct DiscoveryRegistry {
    colonies: RwLock<HashMap<String, ColonyInfo>>,
    agents: RwLock<HashMap<String, AgentRecord>>,
    relays: RwLock<HashMap<String, Vec<RelayDescriptor>>>,
    relay_counters: RwLock<HashMap<String, AtomicU64>>,
}

impl DiscoveryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds (or replaces) the [`ColonyInfo`] returned for `colony.colony_id`.
    pub fn register_colony(&self, colony: ColonyInfo) {
        self.colonies.write().unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(colony.colony_id.as_str().to_string(), colony);
    }

    /// Seeds relay descriptors a mesh's agents can request via `RequestRelay`.
    pub fn register_relays(&self, mesh_id: &ColonyId, relays: Vec<RelayDescriptor>) {
        self.relays.write().unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(mesh_id.as_str().to_string(), relays);
    }

    /// `LookupColony(mesh_id) -> ColonyInfo`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::UnknownColony`] if nothing was registered
    /// under `mesh_id`.
    pub fn lookup_colony(&self, mesh_id: &ColonyId) -> Result<ColonyInfo> {
        self.colonies
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(mesh_id.as_str())
            .cloned()
            .ok_or_else(|| DiscoveryError::UnknownColony(mesh_id.as_str().to_string()))
    }

    /// `LookupAgent(agent_id) -> {observed_endpoints[]}`. Unknown agents
    /// return an empty list rather than an error — a caller probing for an
    /// agent that hasn't registered yet is a routine occurrence, not a fault.
    #[must_use]
    pub fn lookup_agent(&self, agent_id: &AgentId) -> Vec<HostPort> {
        self.agents
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(agent_id.as_str())
            .map(|record| record.observed_endpoints.clone())
            .unwrap_or_default()
    }

    /// `RegisterAgent(agent_id, mesh_id, pubkey, observed_endpoint, metadata)
    /// -> {success, ttl}`.
    pub fn register_agent(
        &self,
        agent_id: &AgentId,
        pubkey: &str,
        observed_endpoint: Option<HostPort>,
        metadata: HashMap<String, String>,
    ) -> u64 {
        let mut agents = self.agents.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let record = agents.entry(agent_id.as_str().to_string()).or_insert_with(|| AgentRecord {
            pubkey: pubkey.to_string(),
            observed_endpoints: Vec::new(),
            metadata: HashMap::new(),
        });
        record.pubkey = pubkey.to_string();
        record.metadata = metadata;
        if let Some(endpoint) = observed_endpoint {
            if !record.observed_endpoints.contains(&endpoint) {
                record.observed_endpoints.insert(0, endpoint);
                record.observed_endpoints.truncate(MAX_OBSERVED_ENDPOINTS_PER_AGENT);
            }
        }
        DEFAULT_REGISTRATION_TTL_SECS
    }

    /// `RequestRelay(mesh_id, agent_pubkey, colony_pubkey) -> {relay_endpoint,
    /// session_id, expires_at}`. Selects round-robin among the relays
    /// registered for `mesh_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::NoRelayAvailable`] if the mesh has no
    /// registered relays.
    pub fn request_relay(&self, mesh_id: &ColonyId) -> Result<(HostPort, String, chrono::DateTime<Utc>)> {
        let relays = self.relays.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let pool = relays
            .get(mesh_id.as_str())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| DiscoveryError::NoRelayAvailable(mesh_id.as_str().to_string()))?;

        let counters = self.relay_counters.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let index = if let Some(counter) = counters.get(mesh_id.as_str()) {
            counter.fetch_add(1, Ordering::Relaxed)
        } else {
            drop(counters);
            let mut counters =
                self.relay_counters.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            counters.entry(mesh_id.as_str().to_string()).or_insert_with(|| AtomicU64::new(0)).fetch_add(1, Ordering::Relaxed)
        };

        let relay = &pool[(index as usize) % pool.len()];
        let session_id = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + ChronoDuration::seconds(RELAY_SESSION_TTL_SECS);
        Ok((relay.endpoint.clone(), session_id, expires_at))
    }
}
