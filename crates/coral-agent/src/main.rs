#![allow(clippy::expect_used)]
//! Agent binary entrypoint.
//!
//! Loads an [`AgentConfig`] from a JSON file, starts the local WireGuard
//! device, and runs the connection manager's discovery, registration/
//! reconnection, and heartbeat loops until the process is terminated.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use coral_agent::config::AgentConfig;
use coral_agent::connection::ConnectionManager;
use coral_discovery::{DiscoveryClient, DiscoveryConfig, DiscoveryRegistry, HttpDiscoveryClient, LocalDiscovery};
use coral_wireguard::{Device, DeviceConfig, LinuxPlatform};

fn init_tracing() {
    let filter = std::env::var("CORAL_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .context("usage: coral-agentd <agent-config.json> [discovery-url]")?;
    let discovery_url = args.next();

    let config = AgentConfig::load(&config_path)?.with_env_overrides();
    info!(agent_id = %config.agent_id, colony = %config.colony_mesh_id, "agent starting");

    let device_config = DeviceConfig::new(config.wireguard_private_key.clone())
        .with_listen_port(config.wireguard_port)
        .with_mtu(config.mtu);
    let device = Arc::new(Device::new_device(device_config, LinuxPlatform::new()));
    device.start().await.context("failed to start wireguard device")?;

    // With no Discovery service URL we fall back to a fresh in-process
    // reference registry; useful for local testing, but it has nothing
    // registered until something populates it, so `LookupColony` will fail
    // until a real networked Discovery service is configured.
    let discovery: Arc<dyn DiscoveryClient> = match discovery_url {
        Some(url) => Arc::new(
            HttpDiscoveryClient::new(DiscoveryConfig::new(url)).context("failed to build discovery client")?,
        ),
        None => Arc::new(LocalDiscovery::new(Arc::new(DiscoveryRegistry::new()))),
    };

    let manager = Arc::new(
        ConnectionManager::new(config, discovery, device).context("failed to build connection manager")?,
    );

    let _discovery_handle = manager.clone().start_discovery_loop();
    let heartbeat_task = manager.clone().start_heartbeat_loop();
    let reconnect_task = manager.start_reconnection_loop();

    info!("connection manager loops started");

    tokio::select! {
        result = heartbeat_task => result.context("heartbeat loop exited unexpectedly")?,
        result = reconnect_task => result.context("reconnection loop exited unexpectedly")?,
    }

    Ok(())
}
