//! The Discovery RPC façade (spec §4.5) consumed by both `coral-agent` and
//! `coral-colony`: `LookupColony`, `LookupAgent`, `RegisterAgent`,
//! `RequestRelay`, each bound by a 10 s timeout.
//!
//! Both binaries depend only on the [`DiscoveryClient`] trait. This crate
//! ships [`LocalDiscovery`], an in-process reference backend so the mesh is
//! runnable end-to-end without a separate Discovery service, and
//! [`HttpDiscoveryClient`] for talking to a real networked one.

#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod registry;
pub mod types;

pub use client::{DiscoveryClient, HttpDiscoveryClient, LocalDiscovery};
pub use error::{DiscoveryError, Result};
pub use registry::DiscoveryRegistry;
pub use types::{DiscoveryConfig, DISCOVERY_CALL_TIMEOUT};
