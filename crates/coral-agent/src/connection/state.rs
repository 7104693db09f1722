//! The agent connection FSM (spec §4.1) and its guarded shared state.
//!
//! States: `waiting_discovery`, `unregistered`, `registering`, `registered`,
//! `healthy`. The FSM has no terminal state — it runs for the process
//! lifetime and the loops in [`crate::connection::manager`] drive it.

use std::net::Ipv4Addr;
use std::sync::RwLock;

use coral_wireguard::Endpoint;

/// A point in the agent connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    WaitingDiscovery,
    Unregistered,
    Registering,
    Registered,
    Healthy,
}

struct Inner {
    state: ConnectionState,
    assigned_ip: Option<Ipv4Addr>,
    mesh_subnet: Option<String>,
    current_endpoint: Option<Endpoint>,
    last_successful_endpoint: Option<Endpoint>,
    consecutive_heartbeat_failures: u32,
}

/// The Connection Manager's fast state lock: the FSM variable, the assigned
/// mesh IP, the currently-selected endpoint, the last endpoint a heartbeat
/// succeeded at, and the heartbeat failure counter. Never held across an RPC
/// or a sleep (spec §5).
pub struct SharedState {
    inner: RwLock<Inner>,
}

/// Three consecutive heartbeat failures demote the agent back to
/// `unregistered` (spec §4.1).
pub const HEARTBEAT_FAILURE_THRESHOLD: u32 = 3;

impl SharedState {
    /// Initial state is `waiting_discovery` if `has_colony_info` is false at
    /// construction, otherwise `unregistered` (spec §4.1).
    #[must_use]
    pub fn new(has_colony_info: bool) -> Self {
        let state = if has_colony_info { ConnectionState::Unregistered } else { ConnectionState::WaitingDiscovery };
        Self {
            inner: RwLock::new(Inner {
                state,
                assigned_ip: None,
                mesh_subnet: None,
                current_endpoint: None,
                last_successful_endpoint: None,
                consecutive_heartbeat_failures: 0,
            }),
        }
    }

    #[must_use]
    pub fn get_state(&self) -> ConnectionState {
        self.read().state
    }

    #[must_use]
    pub fn get_assigned_ip(&self) -> Option<Ipv4Addr> {
        self.read().assigned_ip
    }

    #[must_use]
    pub fn get_mesh_subnet(&self) -> Option<String> {
        self.read().mesh_subnet.clone()
    }

    #[must_use]
    pub fn get_last_successful_endpoint(&self) -> Option<Endpoint> {
        self.read().last_successful_endpoint.clone()
    }

    pub fn set_current_endpoint(&self, endpoint: Option<Endpoint>) {
        self.write().current_endpoint = endpoint;
    }

    #[must_use]
    pub fn get_current_endpoint(&self) -> Option<Endpoint> {
        self.read().current_endpoint.clone()
    }

    /// `waiting_discovery` → `unregistered`: Discovery query succeeds.
    pub fn on_discovery_success(&self) {
        let mut inner = self.write();
        if inner.state == ConnectionState::WaitingDiscovery {
            inner.state = ConnectionState::Unregistered;
        }
    }

    /// `unregistered` → `registering`: reconnection loop attempt begins.
    ///
    /// Returns `true` if the transition happened, `false` if the current
    /// state was not `unregistered` (caller should skip the attempt).
    pub fn begin_registering(&self) -> bool {
        let mut inner = self.write();
        if inner.state == ConnectionState::Unregistered {
            inner.state = ConnectionState::Registering;
            true
        } else {
            false
        }
    }

    /// `registering` → `registered`: Register RPC accepted.
    pub fn on_register_accepted(&self, assigned_ip: Ipv4Addr, mesh_subnet: String) {
        let mut inner = self.write();
        inner.state = ConnectionState::Registered;
        inner.assigned_ip = Some(assigned_ip);
        inner.mesh_subnet = Some(mesh_subnet);
    }

    /// `registering` → `unregistered`: Register RPC failed or rejected.
    pub fn on_register_failed(&self) {
        let mut inner = self.write();
        inner.state = ConnectionState::Unregistered;
    }

    /// `registered` → `healthy`: first heartbeat succeeds. Resets the
    /// failure counter and records `last_successful_endpoint`.
    pub fn on_heartbeat_success(&self, endpoint: Option<Endpoint>) {
        let mut inner = self.write();
        inner.state = ConnectionState::Healthy;
        inner.consecutive_heartbeat_failures = 0;
        if endpoint.is_some() {
            inner.last_successful_endpoint = endpoint;
        }
    }

    /// Records a heartbeat failure. Returns `true` if this failure crossed
    /// [`HEARTBEAT_FAILURE_THRESHOLD`] and transitioned the FSM to
    /// `unregistered` (`healthy` → `unregistered`).
    pub fn on_heartbeat_failure(&self) -> bool {
        let mut inner = self.write();
        inner.consecutive_heartbeat_failures += 1;
        if inner.consecutive_heartbeat_failures >= HEARTBEAT_FAILURE_THRESHOLD {
            inner.state = ConnectionState::Unregistered;
            inner.consecutive_heartbeat_failures = 0;
            true
        } else {
            false
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_depends_on_colony_info_presence() {
        assert_eq!(SharedState::new(false).get_state(), ConnectionState::WaitingDiscovery);
        assert_eq!(SharedState::new(true).get_state(), ConnectionState::Unregistered);
    }

    #[test]
    fn discovery_success_only_promotes_from_waiting() {
        let s = SharedState::new(false);
        s.on_discovery_success();
        assert_eq!(s.get_state(), ConnectionState::Unregistered);
        // A second success is a no-op, not a regression.
        s.on_discovery_success();
        assert_eq!(s.get_state(), ConnectionState::Unregistered);
    }

    #[test]
    fn register_accept_then_heartbeat_success_reaches_healthy() {
        let s = SharedState::new(true);
        assert!(s.begin_registering());
        assert_eq!(s.get_state(), ConnectionState::Registering);
        s.on_register_accepted("10.42.0.2".parse().unwrap(), "10.42.0.0/16".into());
        assert_eq!(s.get_state(), ConnectionState::Registered);
        s.on_heartbeat_success(None);
        assert_eq!(s.get_state(), ConnectionState::Healthy);
        assert_eq!(s.get_assigned_ip(), Some("10.42.0.2".parse().unwrap()));
    }

    #[test]
    fn begin_registering_is_noop_outside_unregistered() {
        let s = SharedState::new(false);
        assert!(!s.begin_registering());
        assert_eq!(s.get_state(), ConnectionState::WaitingDiscovery);
    }

    #[test]
    fn three_consecutive_failures_demote_to_unregistered() {
        let s = SharedState::new(true);
        s.begin_registering();
        s.on_register_accepted("10.42.0.2".parse().unwrap(), "10.42.0.0/16".into());
        s.on_heartbeat_success(None);
        assert!(!s.on_heartbeat_failure());
        assert!(!s.on_heartbeat_failure());
        assert!(s.on_heartbeat_failure());
        assert_eq!(s.get_state(), ConnectionState::Unregistered);
    }

    #[test]
    fn heartbeat_success_resets_failure_counter() {
        let s = SharedState::new(true);
        s.begin_registering();
        s.on_register_accepted("10.42.0.2".parse().unwrap(), "10.42.0.0/16".into());
        s.on_heartbeat_success(None);
        assert!(!s.on_heartbeat_failure());
        assert!(!s.on_heartbeat_failure());
        s.on_heartbeat_success(None);
        assert!(!s.on_heartbeat_failure());
        assert!(!s.on_heartbeat_failure());
        assert_eq!(s.get_state(), ConnectionState::Healthy);
    }

    #[test]
    fn heartbeat_success_records_last_successful_endpoint() {
        let s = SharedState::new(true);
        s.begin_registering();
        s.on_register_accepted("10.42.0.2".parse().unwrap(), "10.42.0.0/16".into());
        let ep = Endpoint::from_ip_port("203.0.113.10".parse().unwrap(), 41820);
        s.on_heartbeat_success(Some(ep.clone()));
        assert_eq!(s.get_last_successful_endpoint(), Some(ep));
    }
}
