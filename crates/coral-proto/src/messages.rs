//! RPC message definitions for the `MeshService` (agent ↔ colony) and the
//! `DiscoveryService` (colony/agent ↔ discovery) contracts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentId, ColonyId, ColonyInfo, HostPort, MeshPeerConfig, RejectReason};
use crate::ProtoError;

/// `Register(agent_id, colony_id, colony_secret, wireguard_pubkey, services[],
/// runtime_context, protocol_version)` — sent over the colony's public
/// bootstrap TCP endpoint before any tunnel exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterRequest {
    pub agent_id: AgentId,
    pub colony_id: ColonyId,
    pub colony_secret: String,
    pub wireguard_pubkey: String,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub runtime_context: String,
    pub protocol_version: u32,
}

/// Response to `Register`. Rejections are always a structured response, never
/// a transport-level error — policy decisions are not transport failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RegisterResponse {
    Accepted {
        /// Textual `"ip|subnet"` encoding per the wire-format convention; also
        /// exposed split out for convenience.
        assigned_ip: String,
        mesh_subnet: String,
        peers: Vec<MeshPeerConfig>,
        registered_at: DateTime<Utc>,
    },
    Rejected { reason: RejectReason },
}

impl RegisterResponse {
    #[must_use]
    pub fn accepted(
        assigned_ip: impl Into<String>,
        mesh_subnet: impl Into<String>,
        peers: Vec<MeshPeerConfig>,
        registered_at: DateTime<Utc>,
    ) -> Self {
        Self::Accepted {
            assigned_ip: assigned_ip.into(),
            mesh_subnet: mesh_subnet.into(),
            peers,
            registered_at,
        }
    }

    #[must_use]
    pub fn rejected(reason: RejectReason) -> Self {
        Self::Rejected { reason }
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// Joins `assigned_ip` and `mesh_subnet` with the wire-level `|` separator.
    #[must_use]
    pub fn ip_subnet_encoded(&self) -> Option<String> {
        match self {
            Self::Accepted { assigned_ip, mesh_subnet, .. } => {
                Some(format!("{assigned_ip}|{mesh_subnet}"))
            }
            Self::Rejected { .. } => None,
        }
    }
}

/// Splits a `"ip|subnet"` encoded string into its two halves.
///
/// # Errors
///
/// Returns [`ProtoError::Decoding`] if the string does not contain exactly
/// one `|` separator.
pub fn split_ip_subnet(encoded: &str) -> Result<(String, String), ProtoError> {
    let mut parts = encoded.splitn(2, '|');
    let ip = parts.next().ok_or_else(|| ProtoError::Decoding("missing ip".into()))?;
    let subnet = parts
        .next()
        .ok_or_else(|| ProtoError::Decoding("missing subnet (no '|' separator)".into()))?;
    if parts.next().is_some() {
        return Err(ProtoError::Decoding("unexpected extra '|' separator".into()));
    }
    Ok((ip.to_string(), subnet.to_string()))
}

/// `Heartbeat(agent_id, status)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatRequest {
    pub agent_id: AgentId,
    pub status: String,
}

impl HeartbeatRequest {
    #[must_use]
    pub fn healthy(agent_id: AgentId) -> Self {
        Self { agent_id, status: "healthy".to_string() }
    }
}

/// Response to `Heartbeat`. `commands` is reserved for future control-plane
/// instructions; the core never populates it today.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatResponse {
    pub ok: bool,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl HeartbeatResponse {
    #[must_use]
    pub fn ok() -> Self {
        Self { ok: true, commands: Vec::new() }
    }

    #[must_use]
    pub fn rejected() -> Self {
        Self { ok: false, commands: Vec::new() }
    }
}

/// Envelope for everything an agent sends to a colony over the mesh RPC
/// transport. Mirrors the donor's tagged-enum wire format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MeshRequest {
    Register(RegisterRequest),
    Heartbeat(HeartbeatRequest),
}

/// Envelope for everything a colony sends back to an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MeshResponse {
    Register(RegisterResponse),
    Heartbeat(HeartbeatResponse),
}

impl MeshRequest {
    /// Encodes the request as a single-line JSON message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Encoding`] if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Decodes a request from a single-line JSON message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Decoding`] if the input is not valid JSON or does
    /// not match the schema.
    pub fn from_json(s: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(s).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}

impl MeshResponse {
    /// # Errors
    ///
    /// Returns [`ProtoError::Encoding`] if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`ProtoError::Decoding`] if the input is not valid JSON or does
    /// not match the schema.
    pub fn from_json(s: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(s).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}

// ---------------------------------------------------------------------
// DiscoveryService contract (§4.5)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LookupColonyRequest {
    pub mesh_id: ColonyId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LookupColonyResponse {
    pub colony: ColonyInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LookupAgentRequest {
    pub agent_id: AgentId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LookupAgentResponse {
    pub observed_endpoints: Vec<HostPort>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterAgentRequest {
    pub agent_id: AgentId,
    pub mesh_id: ColonyId,
    pub pubkey: String,
    pub observed_endpoint: Option<HostPort>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterAgentResponse {
    pub success: bool,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestRelayRequest {
    pub mesh_id: ColonyId,
    pub agent_pubkey: String,
    pub colony_pubkey: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestRelayResponse {
    pub relay_endpoint: HostPort,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_response_ip_subnet_encoding_roundtrips() {
        let resp = RegisterResponse::accepted(
            "10.42.0.2",
            "10.42.0.0/16",
            vec![],
            Utc::now(),
        );
        let encoded = resp.ip_subnet_encoded().unwrap();
        let (ip, subnet) = split_ip_subnet(&encoded).unwrap();
        assert_eq!(ip, "10.42.0.2");
        assert_eq!(subnet, "10.42.0.0/16");
    }

    #[test]
    fn split_ip_subnet_rejects_missing_separator() {
        assert!(split_ip_subnet("10.42.0.2").is_err());
    }

    #[test]
    fn split_ip_subnet_rejects_extra_separator() {
        assert!(split_ip_subnet("10.42.0.2|10.42.0.0/16|extra").is_err());
    }

    #[test]
    fn mesh_request_json_roundtrip() {
        let req = MeshRequest::Heartbeat(HeartbeatRequest::healthy(AgentId::new("agent-a").unwrap()));
        let json = req.to_json().unwrap();
        let decoded = MeshRequest::from_json(&json).unwrap();
        assert_eq!(req, decoded);
    }

    #[test]
    fn register_response_rejected_serializes_reason() {
        let resp = RegisterResponse::rejected(RejectReason::InvalidSecret);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("invalid_secret"));
        assert!(!resp.is_accepted());
    }
}
