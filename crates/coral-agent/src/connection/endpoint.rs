//! Deterministic colony endpoint selection (spec §4.1 `get_colony_endpoint`).

use std::net::IpAddr;

use coral_proto::ColonyInfo;
use coral_wireguard::{Endpoint, DEFAULT_WIREGUARD_PORT};

/// Produces the `ip:port` to point the WireGuard peer at, given the cached
/// [`ColonyInfo`] and the endpoint (if any) the last successful heartbeat
/// used. Never returns a loopback address unless the caller previously
/// recorded loopback as `last_successful_endpoint`, or no other candidate
/// exists.
#[must_use]
pub fn get_colony_endpoint(colony: &ColonyInfo, last_successful: Option<&Endpoint>) -> Option<Endpoint> {
    // 1. Observed (STUN) endpoints take priority; skip empty/IPv6/loopback.
    for hp in &colony.observed_endpoints {
        if let Some(ip) = parse_v4(&hp.host) {
            if !ip.is_loopback() {
                return Some(Endpoint::from_ip_port(ip, hp.port));
            }
        }
    }

    let wg_port = wireguard_port(colony);

    // 3. Prefer the endpoint that last worked, among the regular endpoints.
    if let Some(last) = last_successful {
        for hp in &colony.endpoints {
            if let Some(ip) = parse_v4(&hp.host) {
                let candidate = Endpoint::from_ip_port(ip, wg_port);
                if &candidate == last {
                    return Some(candidate);
                }
            }
        }
    }

    // 4. Otherwise the first parseable, non-loopback entry — unless the last
    // successful endpoint was itself loopback (same-host deployments).
    let last_was_loopback = last_successful.is_some_and(Endpoint::is_loopback);
    for hp in &colony.endpoints {
        if let Some(ip) = parse_v4(&hp.host) {
            if ip.is_loopback() && !last_was_loopback {
                continue;
            }
            return Some(Endpoint::from_ip_port(ip, wg_port));
        }
    }

    // 5. Nothing qualifies.
    None
}

/// WireGuard UDP port: the first observed endpoint's port, else
/// `metadata["wireguard_port"]`, else the default.
fn wireguard_port(colony: &ColonyInfo) -> u16 {
    if let Some(first) = colony.observed_endpoints.first() {
        return first.port;
    }
    if let Some(port) = colony.metadata.get("wireguard_port").and_then(|v| v.parse::<u16>().ok()) {
        return port;
    }
    DEFAULT_WIREGUARD_PORT
}

fn parse_v4(host: &str) -> Option<IpAddr> {
    if host.is_empty() {
        return None;
    }
    match host.parse::<IpAddr>() {
        Ok(ip @ IpAddr::V4(_)) => Some(ip),
        _ => None,
    }
}
