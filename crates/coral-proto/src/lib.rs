//! # coral-proto
//!
//! Wire types shared between `coral-agent` and `coral-colony`: the
//! `MeshService` (Register, Heartbeat) and `DiscoveryService` contracts
//! described in the mesh control plane's data model.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod messages;
pub mod types;

pub use error::ProtoError;
pub use messages::{
    split_ip_subnet, HeartbeatRequest, HeartbeatResponse, LookupAgentRequest,
    LookupAgentResponse, LookupColonyRequest, LookupColonyResponse, MeshRequest, MeshResponse,
    RegisterAgentRequest, RegisterAgentResponse, RegisterRequest, RegisterResponse,
    RequestRelayRequest, RequestRelayResponse,
};
pub use types::{
    AgentId, ColonyId, ColonyInfo, HostPort, MeshPeerConfig, RejectReason, RelayDescriptor,
};
