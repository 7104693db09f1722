//! macOS route management for the userspace WireGuard device.
//!
//! Shells out to `route` and `ifconfig`. A point-to-point `ifconfig ...
//! netmask 255.255.255.255` assignment implicitly installs a subnet route;
//! it is removed immediately so multiple tunnel instances on one host don't
//! collide over the same destination.

use std::net::IpAddr;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, WireGuardError};
use crate::platform::Platform;

/// macOS route manager, shelling out to BSD `route`/`ifconfig`.
#[derive(Debug, Default)]
pub struct MacosPlatform;

impl MacosPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

async fn run(cmd: &str, args: &[&str]) -> Result<std::process::Output> {
    Command::new(cmd)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(WireGuardError::Io)
}

impl Platform for MacosPlatform {
    fn interface_name_hint(&self) -> &str {
        "utun"
    }

    async fn add_host_route(&self, interface: &str, destination: IpAddr) -> Result<()> {
        let dest = destination.to_string();
        let output = run("route", &["-n", "add", "-host", &dest, "-interface", interface]).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("File exists") {
            debug!(interface, %destination, "route already present, ignoring");
            return Ok(());
        }
        Err(WireGuardError::RouteCommand(format!("route add -host {dest}: {stderr}")))
    }

    async fn delete_host_route(&self, interface: &str, destination: IpAddr) -> Result<()> {
        let dest = destination.to_string();
        let output = run("route", &["-n", "delete", "-host", &dest, "-interface", interface]).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("not in table") {
            debug!(interface, %destination, "route already absent, ignoring");
            return Ok(());
        }
        Err(WireGuardError::RouteCommand(format!("route delete -host {dest}: {stderr}")))
    }

    async fn list_routes(&self, interface: &str) -> Result<Vec<IpAddr>> {
        let output = run("netstat", &["-rn", "-f", "inet"]).await?;
        if !output.status.success() {
            return Ok(Vec::new());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter(|line| line.trim_end().ends_with(interface))
            .filter_map(|line| line.split_whitespace().next())
            .filter_map(|ip| ip.parse().ok())
            .collect())
    }

    async fn assign_address(&self, interface: &str, address: IpAddr) -> Result<()> {
        let addr = address.to_string();
        let output = run(
            "ifconfig",
            &[interface, "inet", &addr, &addr, "netmask", "255.255.255.255"],
        )
        .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WireGuardError::RouteCommand(format!("ifconfig {interface}: {stderr}")));
        }
        // ifconfig's point-to-point assignment installs an implicit host
        // route for `addr`; drop it so co-located tunnels don't collide.
        self.delete_host_route(interface, address).await
    }
}
