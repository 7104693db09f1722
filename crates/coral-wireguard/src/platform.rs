//! Minimal platform abstraction for route management.
//!
//! Route mutation is centralized behind this trait so callers can exercise
//! the device orchestration logic against an in-memory fake instead of
//! shelling out to `ip`/`route` in tests.

use std::net::IpAddr;

use crate::error::Result;

/// Operations a concrete platform (Linux, macOS, ...) must provide for the
/// device wrapper to manage host routes pointing traffic at the tunnel.
#[allow(async_fn_in_trait)]
pub trait Platform {
    /// The platform's conventional interface name for a freshly created
    /// device (fixed `wg0` on Linux; an auto-suffixed `utunN` on macOS).
    fn interface_name_hint(&self) -> &str;

    /// Adds a host route for `destination` via `interface`. Must treat
    /// "already exists" as success.
    async fn add_host_route(&self, interface: &str, destination: IpAddr) -> Result<()>;

    /// Deletes the host route for `destination` via `interface`. Must treat
    /// "not in table" as success.
    async fn delete_host_route(&self, interface: &str, destination: IpAddr) -> Result<()>;

    /// Lists destinations currently routed via `interface`.
    async fn list_routes(&self, interface: &str) -> Result<Vec<IpAddr>>;

    /// Assigns a `/32` address to the tunnel interface. On platforms whose
    /// point-to-point assignment implicitly creates a subnet route, the
    /// implementation must remove that route immediately so co-located
    /// instances don't collide.
    async fn assign_address(&self, interface: &str, address: IpAddr) -> Result<()>;
}

/// An in-memory fake used by unit and integration tests; never shells out.
#[derive(Debug, Default)]
pub struct FakePlatform {
    routes: tokio::sync::Mutex<std::collections::HashMap<String, Vec<IpAddr>>>,
}

impl FakePlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Platform for FakePlatform {
    fn interface_name_hint(&self) -> &str {
        "wg-fake0"
    }

    async fn add_host_route(&self, interface: &str, destination: IpAddr) -> Result<()> {
        let mut routes = self.routes.lock().await;
        let entry = routes.entry(interface.to_string()).or_default();
        if !entry.contains(&destination) {
            entry.push(destination);
        }
        Ok(())
    }

    async fn delete_host_route(&self, interface: &str, destination: IpAddr) -> Result<()> {
        let mut routes = self.routes.lock().await;
        if let Some(entry) = routes.get_mut(interface) {
            entry.retain(|ip| *ip != destination);
        }
        Ok(())
    }

    async fn list_routes(&self, interface: &str) -> Result<Vec<IpAddr>> {
        let routes = self.routes.lock().await;
        Ok(routes.get(interface).cloned().unwrap_or_default())
    }

    async fn assign_address(&self, _interface: &str, _address: IpAddr) -> Result<()> {
        Ok(())
    }
}
