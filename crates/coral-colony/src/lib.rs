//! # coral-colony
//!
//! The colony: the control-plane side of a CORAL mesh.
//!
//! A colony owns one WireGuard device, a durable per-colony IP allocator, and
//! an agent registry, and exposes `Register`/`Heartbeat` over HTTP so agents
//! can join the mesh and keep their liveness fresh. See [`mesh::MeshHandler`]
//! for the RPC semantics and [`server::ColonyServer`] for the transport.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod mesh;
pub mod registry;
pub mod server;
pub mod session;

pub use config::{ColonyConfig, ENV_PUBLIC_ENDPOINT, ENV_WIREGUARD_PORT};
pub use error::{ColonyError, Result};
pub use mesh::MeshHandler;
pub use registry::{spawn_stale_reaper, AgentRegistry};
pub use server::ColonyServer;
pub use session::{MeshSession, SessionState, ViolationTracker};
