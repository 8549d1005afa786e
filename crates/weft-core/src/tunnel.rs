//! Seam to the kernel tunnel device.
//!
//! A stateless facade: each operation maps to one device configuration
//! apply. Implementations validate their inputs fully before touching the
//! device, so a returned error means nothing was written.

use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;
use ipnet::Ipv4Net;

use crate::{error::CoreError, peer::PeerId};

/// Operations on a local tunnel interface.
#[async_trait]
pub trait TunnelAdapter: Send + Sync + 'static {
    /// Create the interface and assign its overlay address. Idempotent:
    /// creating an interface that already exists with the same address
    /// succeeds.
    async fn create(&self, iface: &str, local_addr: Ipv4Net) -> Result<(), CoreError>;

    /// Set the interface private key and firewall mark. The interface must
    /// exist.
    async fn configure(&self, iface: &str, private_key: &str) -> Result<(), CoreError>;

    /// The interface's current UDP listen port.
    async fn get_listen_port(&self, iface: &str) -> Result<u16, CoreError>;

    /// Move the interface to a new UDP listen port.
    async fn update_listen_port(&self, iface: &str, port: u16) -> Result<(), CoreError>;

    /// Add a peer or update an existing one.
    ///
    /// Updates must not drop the peer's live session: allowed IPs are
    /// replaced, but the handshake state survives. The endpoint is applied
    /// only when given.
    async fn upsert_peer(
        &self,
        iface: &str,
        peer_key: &PeerId,
        allowed_ips: &[Ipv4Net],
        keepalive: Duration,
        endpoint: Option<SocketAddr>,
    ) -> Result<(), CoreError>;

    /// Update only the transport endpoint of an existing peer, leaving
    /// allowed IPs untouched. Used when NAT traversal promotes a better
    /// path mid-session.
    async fn set_peer_endpoint(
        &self,
        iface: &str,
        peer_key: &PeerId,
        endpoint: SocketAddr,
    ) -> Result<(), CoreError>;
}
