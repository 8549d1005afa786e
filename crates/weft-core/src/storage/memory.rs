use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use super::{Store, StoreError};
use crate::{
    account::{Account, AccountId},
    peer::{Peer, PeerId},
};

/// In-memory store backing tests, simulations, and single-node deployments.
///
/// Accounts live in a map guarded by one mutex; the peer and setup-key
/// indexes are maintained alongside so every lookup path stays O(1).
/// Cloning shares the underlying state.
///
/// # Thread Safety
///
/// All state sits behind a `Mutex`, locked only for the duration of each
/// synchronous map operation (never across an await point). The lock uses
/// `expect`: a poisoned mutex means another thread panicked mid-mutation,
/// and continuing from unknown state would be worse than stopping.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    accounts: HashMap<String, Account>,
    /// peer public key -> owning account
    peer_index: HashMap<PeerId, AccountId>,
    /// canonical setup key -> owning account
    key_index: HashMap<String, AccountId>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accounts currently stored. Useful in tests.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn account_count(&self) -> usize {
        self.inner.lock().expect("MemoryStore mutex poisoned").accounts.len()
    }
}

impl MemoryStoreInner {
    fn reindex(&mut self, account: &Account) {
        let id = account.id.clone();

        // Drop index entries that pointed at a previous version of this
        // account, then rebuild from the new one.
        self.peer_index.retain(|_, owner| *owner != id);
        self.key_index.retain(|_, owner| *owner != id);

        for peer_key in account.peers.keys() {
            self.peer_index.insert(peer_key.clone(), id.clone());
        }
        for key in account.setup_keys.keys() {
            self.key_index.insert(key.clone(), id.clone());
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_account(&self, account: Account) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("MemoryStore mutex poisoned");
        inner.reindex(&account);
        inner.accounts.insert(account.id.as_str().to_string(), account);
        Ok(())
    }

    async fn get_account(&self, id: &AccountId) -> Result<Account, StoreError> {
        let inner = self.inner.lock().expect("MemoryStore mutex poisoned");
        inner
            .accounts
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))
    }

    async fn get_account_by_setup_key(&self, upper_key: &str) -> Result<Account, StoreError> {
        let inner = self.inner.lock().expect("MemoryStore mutex poisoned");
        let id = inner
            .key_index
            .get(upper_key)
            .ok_or_else(|| StoreError::NotFound(format!("setup key {upper_key}")))?;
        inner
            .accounts
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::Internal(format!("dangling setup key index for {id}")))
    }

    async fn get_peer_account(&self, peer_key: &PeerId) -> Result<Account, StoreError> {
        let inner = self.inner.lock().expect("MemoryStore mutex poisoned");
        let id = inner
            .peer_index
            .get(peer_key)
            .ok_or_else(|| StoreError::NotFound(format!("peer {peer_key}")))?;
        inner
            .accounts
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::Internal(format!("dangling peer index for {id}")))
    }

    async fn get_peer(&self, peer_key: &PeerId) -> Result<Peer, StoreError> {
        let account = self.get_peer_account(peer_key).await?;
        account
            .peers
            .get(peer_key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("peer {peer_key}")))
    }

    async fn save_peer(&self, account_id: &AccountId, peer: Peer) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("MemoryStore mutex poisoned");
        let inner = &mut *inner;
        let account = inner
            .accounts
            .get_mut(account_id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("account {account_id}")))?;
        let peer_key = peer.key.clone();
        account.peers.insert(peer_key.clone(), peer);
        inner.peer_index.insert(peer_key, account_id.clone());
        Ok(())
    }

    async fn delete_peer(
        &self,
        account_id: &AccountId,
        peer_key: &PeerId,
    ) -> Result<Peer, StoreError> {
        let mut inner = self.inner.lock().expect("MemoryStore mutex poisoned");
        let inner = &mut *inner;
        let account = inner
            .accounts
            .get_mut(account_id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("account {account_id}")))?;
        let peer = account
            .peers
            .remove(peer_key)
            .ok_or_else(|| StoreError::NotFound(format!("peer {peer_key}")))?;
        inner.peer_index.remove(peer_key);
        Ok(peer)
    }

    async fn account_for_peer_key(
        &self,
        peer_key: &PeerId,
    ) -> Result<Option<AccountId>, StoreError> {
        let inner = self.inner.lock().expect("MemoryStore mutex poisoned");
        Ok(inner.peer_index.get(peer_key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ipnet::Ipv4Net;

    use super::*;
    use crate::{
        account::SetupKey,
        peer::{PeerStatus, PeerSystemMeta},
    };

    fn test_key(tag: u8) -> PeerId {
        PeerId::new(format!("{:A>42}{}=", "", char::from(b'a' + tag))).expect("test key")
    }

    fn test_account(id: &str) -> Account {
        let net: Ipv4Net = "10.30.0.0/24".parse().unwrap();
        Account::new(AccountId::new(id), net).with_setup_key(SetupKey::new(
            "7E0BD08E-0000-4AAA-8000-000000000001",
            5,
            Utc::now() + chrono::Duration::hours(1),
        ))
    }

    fn test_peer(tag: u8, ip: &str) -> Peer {
        Peer {
            key: test_key(tag),
            setup_key: "7E0BD08E-0000-4AAA-8000-000000000001".to_string(),
            ip: ip.parse().unwrap(),
            name: format!("host-{tag}"),
            meta: PeerSystemMeta::default(),
            status: PeerStatus { last_seen: Utc::now(), connected: false },
        }
    }

    #[tokio::test]
    async fn save_and_fetch_by_every_index() {
        let store = MemoryStore::new();
        let mut account = test_account("acc-1");
        let peer = test_peer(0, "10.30.0.1");
        account.peers.insert(peer.key.clone(), peer.clone());

        store.save_account(account.clone()).await.unwrap();

        assert_eq!(store.get_account(&account.id).await.unwrap().id, account.id);
        assert_eq!(
            store
                .get_account_by_setup_key("7E0BD08E-0000-4AAA-8000-000000000001")
                .await
                .unwrap()
                .id,
            account.id
        );
        assert_eq!(store.get_peer_account(&peer.key).await.unwrap().id, account.id);
        assert_eq!(store.get_peer(&peer.key).await.unwrap(), peer);
        assert_eq!(store.account_for_peer_key(&peer.key).await.unwrap(), Some(account.id));
    }

    #[tokio::test]
    async fn delete_peer_clears_the_index() {
        let store = MemoryStore::new();
        let mut account = test_account("acc-1");
        let peer = test_peer(0, "10.30.0.1");
        account.peers.insert(peer.key.clone(), peer.clone());
        store.save_account(account.clone()).await.unwrap();

        let removed = store.delete_peer(&account.id, &peer.key).await.unwrap();
        assert_eq!(removed.key, peer.key);

        assert!(store.get_peer(&peer.key).await.is_err());
        assert_eq!(store.account_for_peer_key(&peer.key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_account_replaces_stale_index_entries() {
        let store = MemoryStore::new();
        let mut account = test_account("acc-1");
        let peer = test_peer(0, "10.30.0.1");
        account.peers.insert(peer.key.clone(), peer.clone());
        store.save_account(account.clone()).await.unwrap();

        // Re-save the account without the peer; the index entry must go.
        account.peers.clear();
        store.save_account(account).await.unwrap();

        assert_eq!(store.account_for_peer_key(&peer.key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_lookups_are_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_account(&AccountId::new("nope")).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.get_peer(&test_key(9)).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.get_account_by_setup_key("NOPE").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
