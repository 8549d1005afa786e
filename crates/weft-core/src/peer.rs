//! Peers: identity, metadata, status, and the manager operations on them.
//!
//! A peer is one host in the overlay, identified by its tunnel public key.
//! The key is the identity; everything else (name, address, status) hangs
//! off it and may change.

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::{
    account::{AccountId, AccountManager},
    env::Environment,
    error::CoreError,
    storage::Store,
};

/// A tunnel public key: 44 characters of standard base64 ending in `=`.
///
/// The string form is the canonical identity everywhere: map keys, wire
/// messages, log fields. Ordering is lexicographic, which the connection
/// layer uses as a coordination-free role tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Parse and validate a public key string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Invalid`] unless the input is exactly 44 base64
    /// characters with the trailing padding a 32-byte key encodes to.
    pub fn new(key: impl Into<String>) -> Result<Self, CoreError> {
        let key = key.into();
        let bytes = key.as_bytes();

        let well_formed = bytes.len() == 44
            && bytes[43] == b'='
            && bytes[..43]
                .iter()
                .all(|b| b.is_ascii_alphanumeric() || *b == b'+' || *b == b'/');

        if !well_formed {
            return Err(CoreError::Invalid(format!("malformed public key {key:?}")));
        }

        Ok(Self(key))
    }

    /// The key's canonical text form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Machine metadata reported by the agent at registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSystemMeta {
    /// Reported hostname
    pub hostname: String,
    /// Operating system name
    pub os: String,
    /// Kernel version
    pub kernel: String,
    /// CPU architecture
    pub platform: String,
    /// Agent software version
    pub agent_version: String,
}

/// Liveness as seen by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    /// Last time the peer touched the coordinator
    pub last_seen: DateTime<Utc>,
    /// Whether the peer currently holds a coordinator session
    pub connected: bool,
}

/// One registered host in the overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Tunnel public key, the immutable identity
    pub key: PeerId,
    /// The setup key this peer registered with (canonical upper-cased form)
    pub setup_key: String,
    /// Address assigned from the account network
    pub ip: Ipv4Addr,
    /// Machine name, user-editable
    pub name: String,
    /// Machine metadata
    pub meta: PeerSystemMeta,
    /// Liveness status
    pub status: PeerStatus,
}

/// What an agent proposes at registration time; the manager fills in the
/// rest (address, setup key attribution, initial status).
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    /// Tunnel public key of the registering host
    pub key: PeerId,
    /// Machine name
    pub name: String,
    /// Machine metadata
    pub meta: PeerSystemMeta,
}

impl<S, E> AccountManager<S, E>
where
    S: Store,
    E: Environment,
{
    /// Look up a peer by its public key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for unknown keys.
    pub async fn get_peer(&self, key: &PeerId) -> Result<Peer, CoreError> {
        let _serial = self.mux.lock().await;
        Ok(self.store.get_peer(key).await?)
    }

    /// Look up a peer by its assigned address within an account.
    ///
    /// Address uniqueness within an account makes the linear scan
    /// unambiguous.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the account is unknown or no peer
    /// owns the address.
    pub async fn get_peer_by_ip(
        &self,
        account_id: &AccountId,
        ip: Ipv4Addr,
    ) -> Result<Peer, CoreError> {
        let _serial = self.mux.lock().await;

        let account = self
            .store
            .get_account(account_id)
            .await
            .map_err(|_| CoreError::NotFound("account not found".to_string()))?;

        account
            .peers
            .values()
            .find(|peer| peer.ip == ip)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("peer with IP {ip} not found")))
    }

    /// Every peer of the requester's account except the requester itself.
    ///
    /// The result is unordered; callers must not rely on any particular
    /// sequence.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Internal`] when the requester is unknown: only
    /// registered peers may call this, so an unknown key is a protocol
    /// violation rather than an empty result.
    pub async fn list_peers_except(&self, requester: &PeerId) -> Result<Vec<Peer>, CoreError> {
        let _serial = self.mux.lock().await;

        let account = self
            .store
            .get_peer_account(requester)
            .await
            .map_err(|_| CoreError::Internal(format!("invalid peer key {requester}")))?;

        Ok(account.peers.values().filter(|peer| &peer.key != requester).cloned().collect())
    }

    /// Change a peer's name. Returns the updated peer.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for unknown peers, [`CoreError::Internal`]
    /// on storage failure.
    pub async fn rename_peer(
        &self,
        account_id: &AccountId,
        key: &PeerId,
        new_name: &str,
    ) -> Result<Peer, CoreError> {
        let _serial = self.mux.lock().await;

        let mut peer = self.store.get_peer(key).await?;
        peer.name = new_name.to_string();
        self.store.save_peer(account_id, peer.clone()).await?;

        Ok(peer)
    }

    /// Record a peer's coordinator session coming up or going down.
    ///
    /// `last_seen` advances on every call, connected or not: a disconnect is
    /// still the latest time we heard from the peer.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for unknown peers, [`CoreError::Internal`]
    /// on storage failure.
    pub async fn mark_peer_connected(&self, key: &PeerId, connected: bool) -> Result<(), CoreError> {
        let _serial = self.mux.lock().await;

        let mut peer = self.store.get_peer(key).await?;
        let account = self.store.get_peer_account(key).await?;

        peer.status = PeerStatus { last_seen: self.env.now(), connected };
        self.store.save_peer(&account.id, peer).await?;

        Ok(())
    }

    /// Remove a peer from its account. Returns the removed peer.
    ///
    /// The peer's address is not returned to the pool: the account network
    /// watermark keeps advancing, so a deleted peer's address is never
    /// handed to a later registration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for unknown peers.
    pub async fn delete_peer(
        &self,
        account_id: &AccountId,
        key: &PeerId,
    ) -> Result<Peer, CoreError> {
        let _serial = self.mux.lock().await;

        let peer = self.store.delete_peer(account_id, key).await?;
        info!(peer = %key, account = %account_id, "deleted peer");

        Ok(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_accepts_wireguard_keys() {
        // 43 base64 chars + padding, the shape every 32-byte key encodes to.
        let key = "mDjlSc7Wrwv5pHrDbCQeHQzYv6pkcXUAhOW25NSwa0A=";
        let id = PeerId::new(key).expect("should parse");
        assert_eq!(id.as_str(), key);
    }

    #[test]
    fn peer_id_rejects_malformed_keys() {
        let no_padding = "x".repeat(44);
        let bad_char = format!("{}!", "x".repeat(43));
        for bad in ["", "short=", no_padding.as_str(), bad_char.as_str()] {
            assert!(PeerId::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn peer_id_ordering_is_lexicographic() {
        let a = PeerId::new(format!("{}=", "A".repeat(43))).unwrap();
        let b = PeerId::new(format!("{}=", "B".repeat(43))).unwrap();
        assert!(a < b);
    }
}
