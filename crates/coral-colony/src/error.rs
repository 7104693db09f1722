//! Error types for the colony's mesh RPC service.

use std::net::SocketAddr;

use thiserror::Error;

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, ColonyError>;

/// Errors that can occur while running the colony's mesh RPC service.
///
/// Policy rejections during `Register` (wrong colony, bad secret, ...) are
/// not represented here — those are a structured [`coral_proto::RejectReason`]
/// in the RPC response, never a transport-level error.
#[derive(Debug, Error)]
pub enum ColonyError {
    /// Failed to bind the RPC service's listener.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    /// The IP allocator could not produce or release an address.
    #[error("allocator error: {0}")]
    Allocation(#[from] coral_network::AllocationError),

    /// A Discovery RPC (`LookupAgent`, ...) failed.
    #[error("discovery error: {0}")]
    Discovery(#[from] coral_discovery::DiscoveryError),

    /// Programming the agent as a WireGuard peer failed.
    #[error("wireguard error: {0}")]
    WireGuard(#[from] coral_wireguard::WireGuardError),

    /// A wire message failed to encode or decode.
    #[error("protocol error: {0}")]
    Proto(#[from] coral_proto::ProtoError),

    /// The caller is not currently registered (e.g. `Heartbeat` from an
    /// unknown `agent_id`).
    #[error("agent {0} is not registered")]
    UnknownAgent(String),

    /// An inbound connection exceeded the message-size limit too many times.
    #[error("connection terminated after {0} message-size violations")]
    TooManyViolations(u32),

    /// Axum/hyper surfaced an internal serving error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Loading or saving a [`crate::config::ColonyConfig`] file failed.
    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// A config file's contents could not be parsed as JSON.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}
