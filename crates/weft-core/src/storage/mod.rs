//! Durable state behind the account manager.
//!
//! The [`Store`] trait is the persistence seam: the manager never assumes
//! anything about layout beyond "each operation is atomic at the granularity
//! of its argument". Saving an account replaces the whole account or nothing;
//! there is no partially-written peer list for a concurrent reader to see
//! (not that one exists: the manager serializes all access anyway).

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::{
    account::{Account, AccountId},
    peer::{Peer, PeerId},
};

/// Errors from the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The named account or peer does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// The backend failed; the operation had no effect
    #[error("storage failure: {0}")]
    Internal(String),
}

/// Durable map of accounts, peers, and setup keys.
///
/// Implementations maintain three lookup paths into the same data: by
/// account id, by setup key, and by peer public key. The peer-key index is
/// global across accounts; it backs the cross-account uniqueness check at
/// registration.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Persist a whole account, replacing any previous version.
    async fn save_account(&self, account: Account) -> Result<(), StoreError>;

    /// Fetch an account by id.
    async fn get_account(&self, id: &AccountId) -> Result<Account, StoreError>;

    /// Fetch the account owning a setup key (canonical upper-cased form).
    async fn get_account_by_setup_key(&self, upper_key: &str) -> Result<Account, StoreError>;

    /// Fetch the account a peer belongs to.
    async fn get_peer_account(&self, peer_key: &PeerId) -> Result<Account, StoreError>;

    /// Fetch a peer by public key.
    async fn get_peer(&self, peer_key: &PeerId) -> Result<Peer, StoreError>;

    /// Insert or replace one peer within an account.
    async fn save_peer(&self, account_id: &AccountId, peer: Peer) -> Result<(), StoreError>;

    /// Remove a peer from an account, returning the removed record.
    async fn delete_peer(&self, account_id: &AccountId, peer_key: &PeerId)
        -> Result<Peer, StoreError>;

    /// Which account, if any, a public key is registered under.
    async fn account_for_peer_key(
        &self,
        peer_key: &PeerId,
    ) -> Result<Option<AccountId>, StoreError>;
}
