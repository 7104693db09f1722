//! Error types for the agent's connection manager and binary.
//!
//! Mirrors the error taxonomy the control plane distinguishes: transient
//! network failures are retried under backoff and never bubble past a loop,
//! policy rejections and protocol errors return the FSM to `unregistered`,
//! and only startup-fatal conditions (bad config, permission-denied TUN
//! creation) are allowed to abort the process via `anyhow` in `main.rs`.

use thiserror::Error;

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors the connection manager and its loops can encounter.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A Discovery RPC (`LookupColony`, `LookupAgent`, `RegisterAgent`,
    /// `RequestRelay`) failed or timed out.
    #[error("discovery error: {0}")]
    Discovery(#[from] coral_discovery::DiscoveryError),

    /// WireGuard device or key operation failed.
    #[error("wireguard error: {0}")]
    WireGuard(#[from] coral_wireguard::WireGuardError),

    /// A wire message failed to encode or decode.
    #[error("protocol error: {0}")]
    Proto(#[from] coral_proto::ProtoError),

    /// The Register/Heartbeat HTTP transport to the colony failed.
    #[error("mesh transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// `get_colony_endpoint` produced no candidate endpoint; the caller must
    /// treat this as a transient failure and retry under backoff.
    #[error("no colony endpoint available")]
    NoEndpoint,

    /// The colony rejected `Register` for policy reasons (wrong colony,
    /// invalid secret, ...). Not fatal: the agent remains `unregistered` and
    /// retries, but a human may need to fix configuration.
    #[error("registration rejected: {0}")]
    RegistrationRejected(coral_proto::RejectReason),

    /// The colony's `Heartbeat` response reported `ok: false`; the agent
    /// treats this the same as a transport failure for backoff purposes.
    #[error("heartbeat rejected by colony")]
    HeartbeatRejected,

    /// Loading or saving an [`crate::config::AgentConfig`] file failed.
    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// A config file's contents could not be parsed as JSON.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_rejected_display_includes_reason() {
        let err = AgentError::RegistrationRejected(coral_proto::RejectReason::InvalidSecret);
        assert!(err.to_string().contains("invalid_secret"));
    }

    #[test]
    fn no_endpoint_has_stable_message() {
        assert_eq!(AgentError::NoEndpoint.to_string(), "no colony endpoint available");
    }
}
