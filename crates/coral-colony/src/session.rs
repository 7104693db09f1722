//! Per-connection bookkeeping for the colony's mesh RPC service.
//!
//! The RPC transport (axum) is stateless per-request, but the colony still
//! tracks a session per remote peer so it can drop idle or misbehaving
//! connections and answer "who is currently connected" independently of the
//! agent registry's longer-lived `last_seen` liveness entries.

use chrono::{DateTime, Utc};
use coral_proto::AgentId;

/// Tracks message-size violations for a connection, terminating it once the
/// configured threshold is exceeded.
#[derive(Debug, Default)]
pub struct ViolationTracker {
    count: u32,
}

impl ViolationTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self { count: 0 }
    }

    /// Records a violation and returns the new count.
    pub fn record_violation(&mut self) -> u32 {
        self.count = self.count.saturating_add(1);
        self.count
    }

    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Whether the violation count has passed `max_violations`.
    #[must_use]
    pub const fn should_terminate(&self, max_violations: u32) -> bool {
        self.count > max_violations
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

/// Lifecycle state of a [`MeshSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected but not yet registered (no successful `Register` yet).
    Connected,
    /// `Register` succeeded; the session belongs to a known agent.
    Registered,
    /// Being torn down (e.g. after too many size violations).
    Disconnecting,
    /// Fully torn down.
    Disconnected,
}

impl SessionState {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Connected | Self::Registered)
    }
}

/// A single remote peer's connection state, from first contact through
/// registration to teardown.
#[derive(Debug)]
pub struct MeshSession {
    id: uuid::Uuid,
    agent_id: Option<AgentId>,
    state: SessionState,
    connected_at: DateTime<Utc>,
    last_message_at: DateTime<Utc>,
}

impl MeshSession {
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self { id: uuid::Uuid::new_v4(), agent_id: None, state: SessionState::Connected, connected_at: now, last_message_at: now }
    }

    #[must_use]
    pub const fn id(&self) -> uuid::Uuid {
        self.id
    }

    #[must_use]
    pub fn agent_id(&self) -> Option<&AgentId> {
        self.agent_id.as_ref()
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    #[must_use]
    pub const fn last_message_at(&self) -> DateTime<Utc> {
        self.last_message_at
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.agent_id.is_some() && matches!(self.state, SessionState::Registered)
    }

    pub fn set_agent_id(&mut self, agent_id: AgentId) {
        self.agent_id = Some(agent_id);
        self.state = SessionState::Registered;
    }

    pub fn touch(&mut self) {
        self.last_message_at = Utc::now();
    }

    pub fn disconnect(&mut self) {
        self.state = SessionState::Disconnecting;
    }

    pub fn set_disconnected(&mut self) {
        self.state = SessionState::Disconnected;
    }
}

impl Default for MeshSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_tracker_terminates_past_threshold() {
        let mut tracker = ViolationTracker::new();
        tracker.record_violation();
        tracker.record_violation();
        assert!(!tracker.should_terminate(2));
        tracker.record_violation();
        assert!(tracker.should_terminate(2));
    }

    #[test]
    fn violation_tracker_saturates_and_resets() {
        let mut tracker = ViolationTracker { count: u32::MAX - 1 };
        tracker.record_violation();
        tracker.record_violation();
        assert_eq!(tracker.count(), u32::MAX);
        tracker.reset();
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn session_state_is_active() {
        assert!(SessionState::Connected.is_active());
        assert!(SessionState::Registered.is_active());
        assert!(!SessionState::Disconnecting.is_active());
        assert!(!SessionState::Disconnected.is_active());
    }

    #[test]
    fn mesh_session_register_transitions_state() {
        let mut session = MeshSession::new();
        assert_eq!(session.state(), SessionState::Connected);
        session.set_agent_id(AgentId::new("agent-a").unwrap());
        assert_eq!(session.state(), SessionState::Registered);
        assert!(session.is_registered());
    }

    #[test]
    fn mesh_session_disconnect_sequence() {
        let mut session = MeshSession::new();
        session.disconnect();
        assert!(!session.is_active());
        session.set_disconnected();
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn distinct_sessions_have_distinct_ids() {
        assert_ne!(MeshSession::new().id(), MeshSession::new().id());
    }
}
