//! Recording tunnel adapter.
//!
//! Tracks what a real device would hold (peers, their allowed IPs and
//! endpoints) and additionally journals every call, so tests can assert
//! both final state and the exact programming sequence.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use ipnet::Ipv4Net;
use weft_core::{error::CoreError, peer::PeerId, tunnel::TunnelAdapter};

/// One recorded adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelOp {
    /// `create` was called
    Create {
        /// Interface name
        iface: String,
        /// Overlay address assigned to the interface
        local_addr: Ipv4Net,
    },
    /// `configure` was called (the key itself is not recorded)
    Configure {
        /// Interface name
        iface: String,
    },
    /// `update_listen_port` was called
    UpdateListenPort {
        /// Interface name
        iface: String,
        /// New port
        port: u16,
    },
    /// `upsert_peer` was called
    UpsertPeer {
        /// Peer being programmed
        peer_key: PeerId,
        /// Allowed IPs installed
        allowed_ips: Vec<Ipv4Net>,
        /// Endpoint installed, if any
        endpoint: Option<SocketAddr>,
    },
    /// `set_peer_endpoint` was called
    SetPeerEndpoint {
        /// Peer being updated
        peer_key: PeerId,
        /// New endpoint
        endpoint: SocketAddr,
    },
}

/// Device-side view of one programmed peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPeer {
    /// Allowed IPs currently installed
    pub allowed_ips: Vec<Ipv4Net>,
    /// Keepalive currently installed
    pub keepalive: Duration,
    /// Endpoint currently installed
    pub endpoint: Option<SocketAddr>,
}

#[derive(Default)]
struct TunnelInner {
    created: Option<(String, Ipv4Net)>,
    configured: bool,
    listen_port: u16,
    peers: HashMap<PeerId, RecordedPeer>,
    ops: Vec<TunnelOp>,
}

/// In-memory [`TunnelAdapter`]. Clones share state.
#[derive(Clone)]
pub struct MemoryTunnel {
    inner: Arc<Mutex<TunnelInner>>,
}

impl MemoryTunnel {
    /// Adapter reporting the conventional listen port (51820).
    #[must_use]
    pub fn new() -> Self {
        Self::with_listen_port(51820)
    }

    /// Adapter reporting a specific listen port.
    #[must_use]
    pub fn with_listen_port(port: u16) -> Self {
        let inner = TunnelInner { listen_port: port, ..TunnelInner::default() };
        Self { inner: Arc::new(Mutex::new(inner)) }
    }

    /// Journal of every call, in order.
    #[must_use]
    pub fn ops(&self) -> Vec<TunnelOp> {
        self.inner.lock().expect("MemoryTunnel mutex poisoned").ops.clone()
    }

    /// Current device state for one peer.
    #[must_use]
    pub fn peer(&self, key: &PeerId) -> Option<RecordedPeer> {
        self.inner.lock().expect("MemoryTunnel mutex poisoned").peers.get(key).cloned()
    }

    /// Number of peers currently programmed.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.inner.lock().expect("MemoryTunnel mutex poisoned").peers.len()
    }
}

impl Default for MemoryTunnel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TunnelAdapter for MemoryTunnel {
    async fn create(&self, iface: &str, local_addr: Ipv4Net) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().expect("MemoryTunnel mutex poisoned");
        if let Some((existing, existing_addr)) = &inner.created {
            // Idempotent only for an identical re-create.
            if existing != iface || *existing_addr != local_addr {
                return Err(CoreError::Internal(format!(
                    "interface {existing} already exists with a different address"
                )));
            }
        }
        inner.created = Some((iface.to_string(), local_addr));
        inner.ops.push(TunnelOp::Create { iface: iface.to_string(), local_addr });
        Ok(())
    }

    async fn configure(&self, iface: &str, private_key: &str) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().expect("MemoryTunnel mutex poisoned");
        ensure_created(&inner, iface)?;
        if private_key.is_empty() {
            return Err(CoreError::Invalid("empty private key".to_string()));
        }
        inner.configured = true;
        inner.ops.push(TunnelOp::Configure { iface: iface.to_string() });
        Ok(())
    }

    async fn get_listen_port(&self, iface: &str) -> Result<u16, CoreError> {
        let inner = self.inner.lock().expect("MemoryTunnel mutex poisoned");
        ensure_created(&inner, iface)?;
        Ok(inner.listen_port)
    }

    async fn update_listen_port(&self, iface: &str, port: u16) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().expect("MemoryTunnel mutex poisoned");
        ensure_created(&inner, iface)?;
        inner.listen_port = port;
        inner.ops.push(TunnelOp::UpdateListenPort { iface: iface.to_string(), port });
        Ok(())
    }

    async fn upsert_peer(
        &self,
        iface: &str,
        peer_key: &PeerId,
        allowed_ips: &[Ipv4Net],
        keepalive: Duration,
        endpoint: Option<SocketAddr>,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().expect("MemoryTunnel mutex poisoned");
        ensure_created(&inner, iface)?;

        let entry = inner.peers.entry(peer_key.clone()).or_insert(RecordedPeer {
            allowed_ips: Vec::new(),
            keepalive,
            endpoint: None,
        });
        entry.allowed_ips = allowed_ips.to_vec();
        entry.keepalive = keepalive;
        if endpoint.is_some() {
            entry.endpoint = endpoint;
        }

        inner.ops.push(TunnelOp::UpsertPeer {
            peer_key: peer_key.clone(),
            allowed_ips: allowed_ips.to_vec(),
            endpoint,
        });
        Ok(())
    }

    async fn set_peer_endpoint(
        &self,
        iface: &str,
        peer_key: &PeerId,
        endpoint: SocketAddr,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().expect("MemoryTunnel mutex poisoned");
        ensure_created(&inner, iface)?;

        let entry = inner
            .peers
            .get_mut(peer_key)
            .ok_or_else(|| CoreError::NotFound(format!("tunnel peer {peer_key}")))?;
        entry.endpoint = Some(endpoint);

        inner.ops.push(TunnelOp::SetPeerEndpoint { peer_key: peer_key.clone(), endpoint });
        Ok(())
    }
}

fn ensure_created(inner: &TunnelInner, iface: &str) -> Result<(), CoreError> {
    match &inner.created {
        Some((existing, _)) if existing == iface => Ok(()),
        _ => Err(CoreError::NotFound(format!("interface {iface}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PeerId {
        PeerId::new(format!("{}=", "K".repeat(43))).expect("test key")
    }

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn upsert_then_endpoint_update_preserves_allowed_ips() {
        let tunnel = MemoryTunnel::new();
        tunnel.create("wt0", net("10.30.0.1/24")).await.unwrap();

        let ips = vec![net("10.30.0.2/32")];
        tunnel
            .upsert_peer("wt0", &key(), &ips, Duration::from_secs(25), None)
            .await
            .unwrap();

        let endpoint: SocketAddr = "203.0.113.9:41000".parse().unwrap();
        tunnel.set_peer_endpoint("wt0", &key(), endpoint).await.unwrap();

        let peer = tunnel.peer(&key()).unwrap();
        assert_eq!(peer.allowed_ips, ips);
        assert_eq!(peer.endpoint, Some(endpoint));
    }

    #[tokio::test]
    async fn endpoint_update_requires_existing_peer() {
        let tunnel = MemoryTunnel::new();
        tunnel.create("wt0", net("10.30.0.1/24")).await.unwrap();

        let endpoint: SocketAddr = "203.0.113.9:41000".parse().unwrap();
        let result = tunnel.set_peer_endpoint("wt0", &key(), endpoint).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn create_is_idempotent_for_identical_args() {
        let tunnel = MemoryTunnel::new();
        tunnel.create("wt0", net("10.30.0.1/24")).await.unwrap();
        tunnel.create("wt0", net("10.30.0.1/24")).await.unwrap();

        let result = tunnel.create("wt0", net("10.40.0.1/24")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn operations_require_the_interface() {
        let tunnel = MemoryTunnel::new();
        assert!(tunnel.get_listen_port("wt0").await.is_err());
        assert!(tunnel.configure("wt0", "priv").await.is_err());
    }
}
