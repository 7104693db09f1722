//! # coral-agent
//!
//! Agent side of a CORAL mesh (spec §4.1): the connection manager FSM that
//! takes an agent from `waiting_discovery` through `registered` to a steady
//! `healthy` state, reconnecting under backoff whenever the colony becomes
//! unreachable.
//!
//! This crate provides:
//!
//! - Configuration — identity, colony secret, WireGuard parameters
//! - The connection FSM and its guarded shared state
//! - Exponential backoff with jitter for registration and discovery retries
//! - Deterministic colony endpoint selection
//! - The discovery, registration/reconnection, and heartbeat loops

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod error;

pub use config::AgentConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use error::AgentError;
