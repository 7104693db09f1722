//! Error types for WireGuard key, device, and route operations.

use thiserror::Error;

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, WireGuardError>;

/// Errors that can occur during WireGuard key, device, and route operations.
#[derive(Debug, Error)]
pub enum WireGuardError {
    /// Invalid key format.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid base64 encoding.
    #[error("invalid base64 encoding: {0}")]
    InvalidBase64(String),

    /// Invalid key length.
    #[error("invalid key length: expected 32, got {0}")]
    InvalidKeyLength(usize),

    /// Invalid CIDR notation for an allowed IP.
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    /// Invalid endpoint (`host:port`).
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// `start()` called on a device that is already running, or a peer
    /// operation attempted on a device that has not been started.
    #[error("device not in required state: {0}")]
    InvalidDeviceState(String),

    /// `set_allocator` called after `start()`.
    #[error("allocator must be set before the device is started")]
    AllocatorAlreadySet,

    /// A peer's public key or `allowed_ips` failed validation.
    #[error("invalid peer configuration: {0}")]
    InvalidPeer(String),

    /// Underlying UAPI text protocol was malformed.
    #[error("UAPI protocol error: {0}")]
    UapiProtocol(String),

    /// TUN device creation was denied by the OS (commonly a missing
    /// `CAP_NET_ADMIN` / `NET_ADMIN` capability).
    #[error("permission denied creating TUN device (requires elevated network privileges): {0}")]
    PermissionDenied(String),

    /// A route management shell-out failed for a reason other than the
    /// swallowed "already exists" / "not in table" cases.
    #[error("route command failed: {0}")]
    RouteCommand(String),

    /// DNS resolution of a peer endpoint hostname failed or produced no
    /// usable IPv4 literal.
    #[error("could not resolve endpoint host {0} to an IPv4 address")]
    EndpointResolution(String),

    /// Generic I/O failure (socket bind, subprocess spawn, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<base64::DecodeError> for WireGuardError {
    fn from(e: base64::DecodeError) -> Self {
        Self::InvalidBase64(e.to_string())
    }
}
