//! Error types for the Discovery client and its in-memory reference registry.

use thiserror::Error;

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors that can occur while looking up or registering with Discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The requested colony/mesh is not known to this Discovery backend.
    #[error("unknown colony: {0}")]
    UnknownColony(String),

    /// The requested agent is not known to this Discovery backend.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// No relay is available for the requesting mesh.
    #[error("no relay available for mesh {0}")]
    NoRelayAvailable(String),

    /// The call exceeded its per-operation timeout (spec §4.5: 10s for every
    /// Discovery RPC).
    #[error("discovery call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Transport-level failure talking to a networked Discovery service.
    #[error("discovery transport error: {0}")]
    Transport(String),
}
