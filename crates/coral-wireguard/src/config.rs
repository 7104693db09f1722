//! Configuration for a WireGuard device.

use crate::keys::PrivateKey;
use crate::types::AllowedIp;

/// WireGuard port requested via `CORAL_WIREGUARD_PORT`, or chosen by the
/// caller directly. `0` requests an ephemeral port from the OS.
pub const EPHEMERAL_PORT: u16 = 0;

/// Default WireGuard UDP port used when nothing else specifies one.
pub const DEFAULT_WIREGUARD_PORT: u16 = 51820;

/// Configuration consumed by [`crate::device::Device::new_device`].
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// The device's private key.
    pub private_key: PrivateKey,
    /// Requested UDP listen port. `0` / negative-equivalent means ephemeral.
    pub listen_port: u16,
    /// The `/32` address assigned to the tunnel interface once `start()` runs.
    pub address: Option<AllowedIp>,
    /// Optional MTU override.
    pub mtu: Option<u16>,
}

impl DeviceConfig {
    #[must_use]
    pub fn new(private_key: PrivateKey) -> Self {
        Self { private_key, listen_port: EPHEMERAL_PORT, address: None, mtu: None }
    }

    #[must_use]
    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    #[must_use]
    pub fn with_address(mut self, address: AllowedIp) -> Self {
        self.address = Some(address);
        self
    }

    #[must_use]
    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = Some(mtu);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_config_defaults_to_ephemeral_port() {
        let cfg = DeviceConfig::new(PrivateKey::generate());
        assert_eq!(cfg.listen_port, EPHEMERAL_PORT);
    }
}
