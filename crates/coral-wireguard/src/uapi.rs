//! Encoder/decoder for the UAPI text configuration protocol.
//!
//! The protocol is a sequence of `key=value` lines terminated by a blank
//! line. A device-level block carries `private_key`/`listen_port`/
//! `replace_peers`; each peer block begins with a `public_key=<hex>` line
//! and carries `endpoint`, `allowed_ip` (repeated), `persistent_keepalive_interval`,
//! and `remove`.

use std::fmt::Write as _;

use crate::error::{Result, WireGuardError};
use crate::keys::PublicKey;
use crate::types::{AllowedIp, Endpoint, PeerConfig};

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

fn hex_decode(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(WireGuardError::UapiProtocol(format!("odd-length hex string: {s}")));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|e| WireGuardError::UapiProtocol(format!("invalid hex byte in {s}: {e}")))
        })
        .collect()
}

/// Builds the device-level UAPI block setting the private key and listen
/// port (device creation step of `start()`).
#[must_use]
pub fn encode_device_config(private_key_hex: &str, listen_port: u16) -> String {
    format!("private_key={private_key_hex}\nlisten_port={listen_port}\n\n")
}

/// Builds the UAPI block that programs a single peer.
///
/// # Errors
///
/// Returns [`WireGuardError::InvalidPeer`] if the peer fails [`PeerConfig::validate`].
pub fn encode_add_peer(peer: &PeerConfig) -> Result<String> {
    peer.validate()?;
    let mut out = String::new();
    let _ = writeln!(out, "public_key={}", hex_encode(peer.public_key.as_bytes()));
    if let Some(endpoint) = &peer.endpoint {
        let _ = writeln!(out, "endpoint={endpoint}");
    }
    let _ = writeln!(out, "replace_allowed_ips=true");
    for ip in &peer.allowed_ips {
        let _ = writeln!(out, "allowed_ip={ip}");
    }
    if let Some(keepalive) = peer.persistent_keepalive {
        let _ = writeln!(out, "persistent_keepalive_interval={keepalive}");
    }
    out.push('\n');
    Ok(out)
}

/// Builds the UAPI block that removes a peer by public key.
#[must_use]
pub fn encode_remove_peer(public_key: &PublicKey) -> String {
    format!("public_key={}\nremove=true\n\n", hex_encode(public_key.as_bytes()))
}

/// One peer's state as parsed back from a UAPI `get=1` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPeer {
    pub public_key: PublicKey,
    pub endpoint: Option<Endpoint>,
    pub allowed_ips: Vec<AllowedIp>,
    pub persistent_keepalive: Option<u16>,
}

/// Parses a UAPI response body into peer blocks. Each block starts at a
/// `public_key=` line and runs until the next one or end of input.
///
/// # Errors
///
/// Returns [`WireGuardError::UapiProtocol`] if a line cannot be parsed, or
/// [`WireGuardError`] variants bubbled up from key/endpoint/CIDR parsing.
pub fn parse_device_dump(body: &str) -> Result<Vec<ParsedPeer>> {
    let mut peers = Vec::new();
    let mut current: Option<ParsedPeer> = None;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(WireGuardError::UapiProtocol(format!("malformed line: {line}")));
        };
        match key {
            "public_key" => {
                if let Some(p) = current.take() {
                    peers.push(p);
                }
                let bytes = hex_decode(value)?;
                current = Some(ParsedPeer {
                    public_key: PublicKey::from_bytes(&bytes)
                        .map_err(|e| WireGuardError::UapiProtocol(e.to_string()))?,
                    endpoint: None,
                    allowed_ips: Vec::new(),
                    persistent_keepalive: None,
                });
            }
            "endpoint" => {
                if let Some(p) = current.as_mut() {
                    p.endpoint = Some(
                        value
                            .parse()
                            .map_err(|e: WireGuardError| WireGuardError::UapiProtocol(e.to_string()))?,
                    );
                }
            }
            "allowed_ip" => {
                if let Some(p) = current.as_mut() {
                    p.allowed_ips.push(
                        value
                            .parse()
                            .map_err(|e: WireGuardError| WireGuardError::UapiProtocol(e.to_string()))?,
                    );
                }
            }
            "persistent_keepalive_interval" => {
                if let Some(p) = current.as_mut() {
                    p.persistent_keepalive = value.parse().ok();
                }
            }
            _ => {}
        }
    }
    if let Some(p) = current.take() {
        peers.push(p);
    }
    Ok(peers)
}
