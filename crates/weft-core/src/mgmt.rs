//! Seam to the coordinator's management service, as seen from an agent.

use async_trait::async_trait;
use weft_proto::LoginResponse;

use crate::error::CoreError;

/// Agent-side client for the coordinator.
///
/// Implementations own the transport. The contract the login flow relies
/// on: `login` fails with [`CoreError::PermissionDenied`] when the peer is
/// not registered yet, which routes the caller into `register`.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    /// Fetch the coordinator's public key, used to address and protect
    /// subsequent requests.
    async fn get_server_public_key(&self) -> Result<String, CoreError>;

    /// Log in an already-registered peer.
    async fn login(&self, server_key: &str) -> Result<LoginResponse, CoreError>;

    /// Register this peer with a setup key.
    async fn register(&self, server_key: &str, setup_key: &str)
        -> Result<LoginResponse, CoreError>;
}
