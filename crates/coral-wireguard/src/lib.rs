//! WireGuard device orchestration for the coral mesh control plane.
//!
//! This crate owns Curve25519 key handling, the UAPI text configuration
//! codec, platform-specific route management (Linux `ip route`, macOS
//! `route`/`ifconfig`), and the [`device::Device`] type that ties them
//! together: device lifecycle, peer programming, and the flush-then-
//! reinstall route sequencing an interface IP change requires.

#![forbid(unsafe_code)]

pub mod config;
pub mod device;
pub mod error;
pub mod keys;
pub mod linux;
pub mod macos;
pub mod platform;
pub mod types;
pub mod uapi;

pub use config::{DeviceConfig, DEFAULT_WIREGUARD_PORT, EPHEMERAL_PORT};
pub use device::{Device, DeviceState, InMemoryIpSource, PeerIpSource};
pub use error::{Result, WireGuardError};
pub use keys::{generate_keypair, KeyPair, PrivateKey, PublicKey, KEY_SIZE};
pub use linux::LinuxPlatform;
pub use macos::MacosPlatform;
pub use platform::{FakePlatform, Platform};
pub use types::{AllowedIp, DeviceStatus, Endpoint, PeerConfig, PeerStatus};
