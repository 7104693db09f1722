//! Linux route management for the userspace WireGuard device.
//!
//! Userspace WireGuard implementations do not program the kernel routing
//! table themselves; every `allowed_ip` needs an explicit host route added
//! by the caller. This shells out to `ip route` rather than talking netlink
//! directly, matching the "centralize route mutation, keep it testable
//! behind a trait" guidance for non-Linux platforms and kept symmetric here
//! for one code path across both.

use std::net::IpAddr;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, WireGuardError};
use crate::platform::Platform;

/// Linux route manager, shelling out to the `ip` command from `iproute2`.
#[derive(Debug, Default)]
pub struct LinuxPlatform;

impl LinuxPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

async fn run_ip(args: &[&str]) -> Result<std::process::Output> {
    Command::new("ip")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(WireGuardError::Io)
}

impl Platform for LinuxPlatform {
    fn interface_name_hint(&self) -> &str {
        "wg0"
    }

    async fn add_host_route(&self, interface: &str, destination: IpAddr) -> Result<()> {
        let dest = destination.to_string();
        let output = run_ip(&["route", "add", &dest, "dev", interface]).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("File exists") {
            debug!(interface, %destination, "route already present, ignoring");
            return Ok(());
        }
        Err(WireGuardError::RouteCommand(format!("ip route add {dest}: {stderr}")))
    }

    async fn delete_host_route(&self, interface: &str, destination: IpAddr) -> Result<()> {
        let dest = destination.to_string();
        let output = run_ip(&["route", "del", &dest, "dev", interface]).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such process") || stderr.contains("not in table") {
            debug!(interface, %destination, "route already absent, ignoring");
            return Ok(());
        }
        Err(WireGuardError::RouteCommand(format!("ip route del {dest}: {stderr}")))
    }

    async fn list_routes(&self, interface: &str) -> Result<Vec<IpAddr>> {
        let output = run_ip(&["route", "show", "dev", interface]).await?;
        if !output.status.success() {
            warn!(interface, "ip route show failed, assuming no routes");
            return Ok(Vec::new());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .filter_map(|token| token.split('/').next())
            .filter_map(|ip| ip.parse().ok())
            .collect())
    }

    async fn assign_address(&self, interface: &str, address: IpAddr) -> Result<()> {
        let addr = format!("{address}/32");
        let output = run_ip(&["addr", "add", &addr, "dev", interface]).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("File exists") {
            return Ok(());
        }
        Err(WireGuardError::RouteCommand(format!("ip addr add {addr}: {stderr}")))
    }
}
