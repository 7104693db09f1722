//! Colony binary entrypoint.
//!
//! Loads a [`ColonyConfig`] from a JSON file, starts the WireGuard device,
//! and serves the Register/Heartbeat RPC until the process is terminated.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use coral_colony::{spawn_stale_reaper, AgentRegistry, ColonyConfig, ColonyServer, MeshHandler};
use coral_discovery::{DiscoveryRegistry, LocalDiscovery};
use coral_network::{IpAllocator, JsonFileStore};
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

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: coral-colonyd <config.json>")?;
    let config = Arc::new(ColonyConfig::load(&config_path)?.with_env_overrides());

    info!(colony_id = %config.colony_id.as_str(), bind = %config.bind_addr, "colony starting");

    let device_config = DeviceConfig::new(config.wireguard_private_key.clone())
        .with_listen_port(config.wireguard_port)
        .with_mtu(config.mtu);
    let device = Arc::new(Device::new_device(device_config, LinuxPlatform::new()));
    device.start().await.context("failed to start wireguard device")?;

    let allocator_path = config_path.with_file_name("coral-allocations.json");
    let store = JsonFileStore::open(allocator_path).context("failed to open IP allocation store")?;
    let allocator = Arc::new(
        IpAllocator::new(config.mesh_subnet, Box::new(store)).context("failed to initialize IP allocator")?,
    );

    let discovery = Arc::new(LocalDiscovery::new(Arc::new(DiscoveryRegistry::new())));
    let registry = Arc::new(AgentRegistry::new());

    spawn_stale_reaper(registry.clone(), config.stale_check_interval, config.stale_after);

    let handler = MeshHandler::new(config.clone(), device, allocator, discovery, registry);
    let server = ColonyServer::new(config, handler);

    server.serve().await.context("colony mesh RPC service failed")
}
