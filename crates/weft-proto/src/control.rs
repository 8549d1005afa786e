//! Management messages exchanged between an agent and the coordinator.
//!
//! Messages are CBOR-encoded structs. Decoders ignore unknown fields, so the
//! coordinator can grow optional settings (global config, per-peer config)
//! without breaking deployed agents.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// First-contact request from an already-registered peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// The agent's tunnel public key
    pub peer_key: String,
}

/// Registration request for a peer not yet known to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// The agent's tunnel public key
    pub peer_key: String,
    /// Setup key authorizing this peer to join an account (canonical UUID text)
    pub setup_key: String,
    /// Machine name
    pub name: String,
    /// Machine metadata reported by the agent
    #[serde(default)]
    pub meta: SystemMeta,
}

/// Machine metadata carried with a registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMeta {
    /// Reported hostname
    #[serde(default)]
    pub hostname: String,
    /// Operating system name
    #[serde(default)]
    pub os: String,
    /// Kernel version
    #[serde(default)]
    pub kernel: String,
    /// CPU architecture
    #[serde(default)]
    pub platform: String,
    /// Agent software version
    #[serde(default)]
    pub agent_version: String,
}

/// Successful login or registration result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// The address assigned to this peer inside the account network (CIDR text)
    pub address: String,
    /// The account network this peer belongs to (CIDR text)
    pub network: String,
}

/// One remote peer this agent should be connected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePeer {
    /// Remote peer's tunnel public key
    pub peer_key: String,
    /// CIDRs the remote peer owns over the tunnel
    pub allowed_ips: Vec<String>,
}

/// Coordinator-to-agent update: the full desired peer set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncUpdate {
    /// Every peer this agent is allowed to connect to
    #[serde(default)]
    pub remote_peers: Vec<RemotePeer>,
}

/// Agent-to-coordinator request envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagementRequest {
    /// Fetch the coordinator's public key
    GetServerKey,
    /// Log in an already-registered peer
    Login(LoginRequest),
    /// Register a new peer with a setup key
    Register(RegisterRequest),
}

/// Coordinator-to-agent response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagementResponse {
    /// The coordinator's public key
    ServerKey(String),
    /// Successful login or registration
    Login(LoginResponse),
    /// Structured failure
    Error(ErrorReply),
}

/// Wire form of a coordinator-side failure.
///
/// `kind` is the stable machine-readable discriminator ("not_found",
/// "permission_denied", ...); `message` is for humans only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Stable error kind
    pub kind: String,
    /// Human-readable description
    pub message: String,
}

/// Encode any control message as CBOR.
///
/// # Errors
///
/// Returns [`ProtocolError::CborEncode`] if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(buf)
}

/// Decode any control message from CBOR.
///
/// # Errors
///
/// Returns [`ProtocolError::CborDecode`] if the bytes do not deserialize.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}
