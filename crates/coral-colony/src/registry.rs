//! The colony's agent registry: who is currently registered, and the
//! background reaper that prunes stale liveness entries.
//!
//! This is distinct from [`coral_network::IpAllocator`] — the allocator owns
//! the durable `agent_id -> ip` binding and is never pruned by this reaper;
//! this registry only tracks which agents are *currently live* for building
//! `peers[]` responses and deciding whether a `Heartbeat` is from a known
//! agent.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use coral_proto::{AgentId, MeshPeerConfig};
use tracing::info;

#[derive(Clone)]
struct AgentRecord {
    peer: MeshPeerConfig,
    registered_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// Liveness registry of currently-registered agents, keyed by `agent_id`.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, AgentRecord>>,
}

impl AgentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<AgentId, AgentRecord>> {
        self.agents.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<AgentId, AgentRecord>> {
        self.agents.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Inserts or replaces `agent_id`'s registration, stamping `registered_at`
    /// as now and `last_seen` as now.
    pub fn upsert(&self, agent_id: AgentId, peer: MeshPeerConfig) -> DateTime<Utc> {
        let now = Utc::now();
        self.write().insert(agent_id, AgentRecord { peer, registered_at: now, last_seen: now });
        now
    }

    /// Updates `last_seen` for a registered agent. Returns `false` if the
    /// agent is not registered.
    pub fn touch(&self, agent_id: &AgentId) -> bool {
        let mut agents = self.write();
        let Some(record) = agents.get_mut(agent_id) else { return false };
        record.last_seen = Utc::now();
        true
    }

    #[must_use]
    pub fn contains(&self, agent_id: &AgentId) -> bool {
        self.read().contains_key(agent_id)
    }

    pub fn remove(&self, agent_id: &AgentId) {
        self.write().remove(agent_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All currently-registered peers except `agent_id`, for `Register`'s
    /// `peers[]` response.
    #[must_use]
    pub fn peers_excluding(&self, agent_id: &AgentId) -> Vec<MeshPeerConfig> {
        self.read().iter().filter(|(id, _)| *id != agent_id).map(|(_, r)| r.peer.clone()).collect()
    }

    /// Removes every agent whose `last_seen` is older than `stale_after`,
    /// returning the pruned ids.
    pub fn reap_stale(&self, stale_after: Duration) -> Vec<AgentId> {
        let cutoff = Utc::now() - chrono::Duration::from_std(stale_after).unwrap_or(chrono::Duration::zero());
        let mut agents = self.write();
        let stale: Vec<AgentId> = agents
            .iter()
            .filter(|(_, record)| record.last_seen < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            agents.remove(id);
        }
        stale
    }
}

/// Spawns the background task that periodically reaps stale registrations.
///
/// This only prunes registry liveness entries, never the allocator's durable
/// IP bindings — pruning policy for idle agents beyond this default sweep is
/// left to operator tooling.
pub fn spawn_stale_reaper(
    registry: std::sync::Arc<AgentRegistry>,
    check_interval: Duration,
    stale_after: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(check_interval);
        loop {
            ticker.tick().await;
            let reaped = registry.reap_stale(stale_after);
            if !reaped.is_empty() {
                info!(count = reaped.len(), "reaped stale agent registrations");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str) -> MeshPeerConfig {
        MeshPeerConfig::new(format!("{}{}", "x".repeat(43), id.chars().next().unwrap_or('x')), "10.42.0.2")
    }

    #[test]
    fn upsert_then_contains() {
        let registry = AgentRegistry::new();
        let agent = AgentId::new("agent-a").unwrap();
        registry.upsert(agent.clone(), peer("a"));
        assert!(registry.contains(&agent));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn touch_unknown_agent_returns_false() {
        let registry = AgentRegistry::new();
        assert!(!registry.touch(&AgentId::new("ghost").unwrap()));
    }

    #[test]
    fn peers_excluding_omits_caller() {
        let registry = AgentRegistry::new();
        let a = AgentId::new("agent-a").unwrap();
        let b = AgentId::new("agent-b").unwrap();
        registry.upsert(a.clone(), peer("a"));
        registry.upsert(b.clone(), peer("b"));

        let peers = registry.peers_excluding(&a);
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].mesh_ip, "10.42.0.2");
    }

    #[test]
    fn reap_stale_removes_only_expired_entries() {
        let registry = AgentRegistry::new();
        let stale = AgentId::new("agent-stale").unwrap();
        let fresh = AgentId::new("agent-fresh").unwrap();
        registry.upsert(stale.clone(), peer("s"));
        registry.upsert(fresh.clone(), peer("f"));

        // Force the "stale" entry's last_seen into the past.
        {
            let mut agents = registry.write();
            agents.get_mut(&stale).unwrap().last_seen = Utc::now() - chrono::Duration::hours(2);
        }

        let reaped = registry.reap_stale(Duration::from_secs(300));
        assert_eq!(reaped, vec![stale.clone()]);
        assert!(!registry.contains(&stale));
        assert!(registry.contains(&fresh));
    }
}
