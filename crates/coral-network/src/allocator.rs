//! The persistent, agent_id-keyed IP allocator (spec §4.3).
//!
//! A single exclusive lock serializes every public method, covering both the
//! in-memory map and the store write sequencing: a write is durable before
//! `allocate` returns its IP to the caller, and a store failure rolls the
//! in-memory allocation back rather than leaving the two out of sync.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Mutex;

use chrono::Utc;
use ipnet::Ipv4Net;
use tracing::{debug, info, warn};

use crate::error::{AllocationError, Result};
use crate::store::{AllocationRow, IPAllocationStore};

/// Maximum subnet size the allocator will manage; a smaller prefix (bigger
/// pool) risks nothing, but a subnet larger than `/24` (i.e. a prefix
/// shorter than 24) provides too few addresses and is rejected outright.
const MIN_PREFIX_LEN: u8 = 24;

struct State {
    bindings: HashMap<String, Ipv4Addr>,
    reverse: HashMap<Ipv4Addr, String>,
    freelist: VecDeque<Ipv4Addr>,
    next_ip: u32,
}

/// Invariant-preserving allocator of host addresses inside an IPv4 `/N`
/// subnet, backed by a durable [`IPAllocationStore`].
pub struct IpAllocator {
    subnet: Ipv4Net,
    store: Box<dyn IPAllocationStore>,
    state: Mutex<State>,
}

impl IpAllocator {
    /// Builds an allocator over `subnet`, loading every existing row from
    /// `store` and advancing the free cursor past whatever it has already
    /// handed out.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::InvalidSubnet`] if `subnet`'s prefix is
    /// shorter than `/24`, or [`AllocationError::Store`] if the initial load
    /// fails.
    pub fn new(subnet: Ipv4Net, store: Box<dyn IPAllocationStore>) -> Result<Self> {
        if subnet.prefix_len() < MIN_PREFIX_LEN {
            return Err(AllocationError::InvalidSubnet(format!(
                "{subnet}: prefix must be >= /{MIN_PREFIX_LEN}"
            )));
        }

        let network_start = u32::from(subnet.network());
        let mut next_ip = network_start.saturating_add(2); // skip .0 and the colony's .1
        let mut bindings = HashMap::new();
        let mut reverse = HashMap::new();

        for row in store.load_all()? {
            let raw = u32::from(row.ip_address);
            if raw >= next_ip {
                next_ip = raw.saturating_add(1);
            }
            bindings.insert(row.agent_id.clone(), row.ip_address);
            reverse.insert(row.ip_address, row.agent_id);
        }

        info!(subnet = %subnet, loaded = bindings.len(), "IP allocator initialized from durable store");

        Ok(Self {
            subnet,
            store,
            state: Mutex::new(State { bindings, reverse, freelist: VecDeque::new(), next_ip }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Returns the agent's existing IP idempotently, or assigns and persists
    /// the next free one.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::PoolExhausted`] if the subnet has no
    /// addresses left, or [`AllocationError::Store`] if persistence fails
    /// (the in-memory allocation is rolled back in that case).
    pub fn allocate(&self, agent_id: &str) -> Result<Ipv4Addr> {
        let mut state = self.lock();
        if let Some(ip) = state.bindings.get(agent_id) {
            return Ok(*ip);
        }

        let ip = Self::next_candidate(&mut state, self.subnet)?;

        let row = AllocationRow { agent_id: agent_id.to_string(), ip_address: ip, last_seen: Utc::now() };
        if let Err(e) = self.store.upsert(&row) {
            // Roll back: undo whatever `next_candidate` consumed.
            state.bindings.remove(agent_id);
            state.reverse.remove(&ip);
            state.freelist.push_front(ip);
            warn!(agent_id, %ip, error = %e, "allocation store write failed, rolled back");
            return Err(e);
        }

        state.bindings.insert(agent_id.to_string(), ip);
        state.reverse.insert(ip, agent_id.to_string());
        debug!(agent_id, %ip, "allocated mesh IP");
        Ok(ip)
    }

    fn next_candidate(state: &mut State, subnet: Ipv4Net) -> Result<Ipv4Addr> {
        while let Some(ip) = state.freelist.pop_front() {
            if !state.reverse.contains_key(&ip) {
                return Ok(ip);
            }
        }
        let broadcast = u32::from(subnet.broadcast());
        if state.next_ip > broadcast {
            return Err(AllocationError::PoolExhausted(subnet.to_string()));
        }
        let ip = Ipv4Addr::from(state.next_ip);
        state.next_ip += 1;
        Ok(ip)
    }

    /// Releases the binding for `ip`, if any, making it eligible for reuse.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Store`] if the durable delete fails.
    pub fn release(&self, ip: Ipv4Addr) -> Result<()> {
        let mut state = self.lock();
        let Some(agent_id) = state.reverse.remove(&ip) else { return Ok(()) };
        self.store.delete(&agent_id)?;
        state.bindings.remove(&agent_id);
        state.freelist.push_back(ip);
        Ok(())
    }

    /// Releases the binding for `agent_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Store`] if the durable delete fails.
    pub fn release_by_agent(&self, agent_id: &str) -> Result<()> {
        let mut state = self.lock();
        let Some(ip) = state.bindings.remove(agent_id) else { return Ok(()) };
        self.store.delete(agent_id)?;
        state.reverse.remove(&ip);
        state.freelist.push_back(ip);
        Ok(())
    }

    /// Whether `ip` is currently bound to an agent.
    #[must_use]
    pub fn is_allocated(&self, ip: Ipv4Addr) -> bool {
        self.lock().reverse.contains_key(&ip)
    }

    /// Returns `agent_id`'s currently bound IP, if any.
    #[must_use]
    pub fn get_agent_ip(&self, agent_id: &str) -> Option<Ipv4Addr> {
        self.lock().bindings.get(agent_id).copied()
    }

    /// Number of currently active allocations.
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.lock().bindings.len()
    }

    /// Touches `agent_id`'s `last_seen` timestamp in the durable store
    /// without changing its binding. No-op if the agent has no allocation.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Store`] if the write fails.
    pub fn update_last_seen(&self, agent_id: &str) -> Result<()> {
        let ip = match self.lock().bindings.get(agent_id) {
            Some(ip) => *ip,
            None => return Ok(()),
        };
        let row = AllocationRow { agent_id: agent_id.to_string(), ip_address: ip, last_seen: Utc::now() };
        self.store.upsert(&row)
    }

    /// The subnet this allocator manages.
    #[must_use]
    pub fn subnet(&self) -> Ipv4Net {
        self.subnet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn allocator(subnet: &str) -> IpAllocator {
        IpAllocator::new(subnet.parse().unwrap(), Box::new(InMemoryStore::new())).unwrap()
    }

    #[test]
    fn rejects_subnets_wider_than_slash_24() {
        let result = IpAllocator::new("10.42.0.0/23".parse().unwrap(), Box::new(InMemoryStore::new()));
        assert!(result.is_err());
    }

    #[test]
    fn allocate_skips_network_and_colony_address() {
        let alloc = allocator("10.42.0.0/24");
        let ip = alloc.allocate("agent-a").unwrap();
        assert_eq!(ip, "10.42.0.2".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn allocate_is_idempotent_per_agent() {
        let alloc = allocator("10.42.0.0/24");
        let first = alloc.allocate("agent-a").unwrap();
        let second = alloc.allocate("agent-a").unwrap();
        assert_eq!(first, second);
        assert_eq!(alloc.allocated_count(), 1);
    }

    #[test]
    fn distinct_agents_get_distinct_ips() {
        let alloc = allocator("10.42.0.0/24");
        let a = alloc.allocate("agent-a").unwrap();
        let b = alloc.allocate("agent-b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn release_recycles_ip_via_freelist() {
        let alloc = allocator("10.42.0.0/24");
        let a = alloc.allocate("agent-a").unwrap();
        alloc.release_by_agent("agent-a").unwrap();
        assert_eq!(alloc.allocated_count(), 0);
        let b = alloc.allocate("agent-b").unwrap();
        assert_eq!(a, b, "freelist should hand the released IP back out first");
    }

    #[test]
    fn pool_exhausted_once_subnet_is_full() {
        // A /30 has exactly one usable host after reserving .0/.1/.3(broadcast).
        let alloc = allocator("10.42.0.0/24");
        // Force exhaustion deterministically on a tiny synthetic pool by
        // draining down to the last address via release+reallocate would
        // take 252 calls on a /24; instead assert the boundary condition on
        // a direct cursor check via repeated allocation until the last IP.
        let mut last = None;
        for i in 0..260 {
            let agent = format!("agent-{i}");
            match alloc.allocate(&agent) {
                Ok(ip) => last = Some(ip),
                Err(AllocationError::PoolExhausted(_)) => {
                    assert!(last.is_some());
                    return;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        panic!("expected pool exhaustion within 260 allocations in a /24");
    }

    #[test]
    fn durability_reload_preserves_bindings_and_avoids_collision() {
        use crate::store::JsonFileStore;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allocations.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            let alloc = IpAllocator::new("10.42.0.0/24".parse().unwrap(), Box::new(store)).unwrap();
            let ip = alloc.allocate("agent-a").unwrap();
            assert_eq!(ip, "10.42.0.2".parse::<Ipv4Addr>().unwrap());
        }

        let store = JsonFileStore::open(&path).unwrap();
        let alloc = IpAllocator::new("10.42.0.0/24".parse().unwrap(), Box::new(store)).unwrap();
        assert_eq!(alloc.get_agent_ip("agent-a"), Some("10.42.0.2".parse().unwrap()));
        let ip_b = alloc.allocate("agent-b").unwrap();
        assert_eq!(ip_b, "10.42.0.3".parse::<Ipv4Addr>().unwrap());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn allocate_is_idempotent(n in 1u32..50) {
                let alloc = allocator("10.42.0.0/24");
                let agent = format!("agent-{n}");
                let first = alloc.allocate(&agent).unwrap();
                let second = alloc.allocate(&agent).unwrap();
                prop_assert_eq!(first, second);
            }

            #[test]
            fn distinct_agents_never_collide(count in 1usize..50) {
                let alloc = allocator("10.42.0.0/24");
                let mut seen = std::collections::HashSet::new();
                for i in 0..count {
                    let ip = alloc.allocate(&format!("agent-{i}")).unwrap();
                    prop_assert!(seen.insert(ip), "duplicate IP handed out: {ip}");
                }
            }
        }
    }
}
