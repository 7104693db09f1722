//! Error types for the persistent IP allocator.

use thiserror::Error;

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, AllocationError>;

/// Errors that can occur while configuring or operating the allocator.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// `subnet` is not IPv4, or its prefix exceeds the `/24` floor.
    #[error("invalid subnet {0}: must be IPv4 with prefix length <= 24")]
    InvalidSubnet(String),

    /// The cursor advanced past the last address in the subnet.
    #[error("IP pool exhausted for subnet {0}")]
    PoolExhausted(String),

    /// The durable store failed to persist or load a row.
    #[error("allocation store error: {0}")]
    Store(String),

    /// `allocate` was asked for an agent that already holds a different IP
    /// than the one the caller expected (defensive; not reachable through
    /// the public API today, kept for store-corruption diagnostics).
    #[error("agent {agent_id} already holds {existing}, cannot reassign to {requested}")]
    AlreadyAllocated { agent_id: String, existing: String, requested: String },
}
