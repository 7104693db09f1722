//! The persistent, agent_id-keyed mesh IP allocator (spec §4.3).
//!
//! Deterministically and durably assigns overlay addresses within the
//! configured subnet: the same agent identity always gets the same address
//! back across restarts, backed by a small JSON-file store honoring the
//! `IPAllocationStore` contract.

#![forbid(unsafe_code)]

pub mod allocator;
pub mod error;
pub mod store;

pub use allocator::IpAllocator;
pub use error::{AllocationError, Result};
pub use store::{AllocationRow, IPAllocationStore, InMemoryStore, JsonFileStore};
