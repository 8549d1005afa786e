//! Coordinator-side integration tests: registration, address allocation,
//! setup-key accounting, and the peer catalog operations.

use std::net::Ipv4Addr;

use weft_core::{
    account::{Account, AccountId, AccountManager, ManagerConfig, SetupKey},
    error::CoreError,
    peer::{PeerId, PeerSystemMeta, RegistrationRequest},
    storage::{MemoryStore, Store},
    Environment,
};
use weft_harness::SimEnv;

const SETUP_KEY: &str = "5F8A0B1C-3D4E-4F50-8899-AABBCCDDEEFF";
const ACCOUNT: &str = "acc-test";

fn peer_key(c: char) -> PeerId {
    PeerId::new(format!("{}=", c.to_string().repeat(43))).expect("test key")
}

fn request(c: char, name: &str) -> RegistrationRequest {
    RegistrationRequest {
        key: peer_key(c),
        name: name.to_string(),
        meta: PeerSystemMeta { hostname: format!("{name}.lan"), ..PeerSystemMeta::default() },
    }
}

/// Account over 10.0.0.0/24 with one setup key capped at `limit` uses.
async fn provision(store: &MemoryStore, env: &SimEnv, limit: u32) -> AccountId {
    let id = AccountId::new(ACCOUNT);
    let account = Account::new(id.clone(), "10.0.0.0/24".parse().unwrap()).with_setup_key(
        SetupKey::new(SETUP_KEY, limit, env.now() + chrono::Duration::hours(24)),
    );
    store.save_account(account).await.expect("provisioning should succeed");
    id
}

fn manager(store: &MemoryStore, env: &SimEnv) -> AccountManager<MemoryStore, SimEnv> {
    AccountManager::new(store.clone(), env.clone(), ManagerConfig::default())
}

fn ip(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

#[tokio::test]
async fn fresh_registration_gets_the_first_host_address() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    let account_id = provision(&store, &env, 5).await;
    let manager = manager(&store, &env);

    let peer = manager.register_peer(SETUP_KEY, request('a', "a")).await.unwrap();

    assert_eq!(peer.ip, ip("10.0.0.1"));
    assert!(!peer.status.connected);
    assert_eq!(peer.setup_key, SETUP_KEY);

    let account = store.get_account(&account_id).await.unwrap();
    assert_eq!(account.peers.len(), 1);
    assert_eq!(account.setup_keys[SETUP_KEY].usage_count, 1);
    assert_eq!(account.network.last_ip, Some(ip("10.0.0.1")));
}

#[tokio::test]
async fn second_registration_takes_the_next_address() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    provision(&store, &env, 5).await;
    let manager = manager(&store, &env);

    manager.register_peer(SETUP_KEY, request('a', "a")).await.unwrap();
    let second = manager.register_peer(SETUP_KEY, request('b', "b")).await.unwrap();

    assert_eq!(second.ip, ip("10.0.0.2"));
}

#[tokio::test]
async fn deleted_peer_addresses_are_never_reissued() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    let account_id = provision(&store, &env, 5).await;
    let manager = manager(&store, &env);

    manager.register_peer(SETUP_KEY, request('a', "a")).await.unwrap();
    manager.register_peer(SETUP_KEY, request('b', "b")).await.unwrap();

    let removed = manager.delete_peer(&account_id, &peer_key('a')).await.unwrap();
    assert_eq!(removed.ip, ip("10.0.0.1"));

    let third = manager.register_peer(SETUP_KEY, request('c', "c")).await.unwrap();
    assert_eq!(third.ip, ip("10.0.0.3"));
}

#[tokio::test]
async fn setup_key_usage_is_counted_and_enforced() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    let account_id = provision(&store, &env, 5).await;
    let manager = manager(&store, &env);

    for (i, c) in ['a', 'b', 'c', 'd', 'e'].into_iter().enumerate() {
        manager.register_peer(SETUP_KEY, request(c, "host")).await.unwrap();
        let account = store.get_account(&account_id).await.unwrap();
        assert_eq!(account.setup_keys[SETUP_KEY].usage_count, i as u32 + 1);
    }

    let sixth = manager.register_peer(SETUP_KEY, request('f', "f")).await;
    assert!(matches!(sixth, Err(CoreError::FailedPrecondition(_))));
}

#[tokio::test]
async fn setup_key_is_normalized_before_lookup() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    provision(&store, &env, 5).await;
    let manager = manager(&store, &env);

    let lowered = format!("  {} ", SETUP_KEY.to_lowercase());
    let peer = manager.register_peer(&lowered, request('a', "a")).await.unwrap();
    assert_eq!(peer.setup_key, SETUP_KEY);
}

#[tokio::test]
async fn unknown_setup_key_is_not_found() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    provision(&store, &env, 5).await;
    let manager = manager(&store, &env);

    let result = manager
        .register_peer("00000000-0000-4000-8000-000000000000", request('a', "a"))
        .await;
    assert!(matches!(result, Err(CoreError::NotFound(_))));
}

#[tokio::test]
async fn expired_setup_key_is_a_failed_precondition() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    let account = Account::new(AccountId::new(ACCOUNT), "10.0.0.0/24".parse().unwrap())
        .with_setup_key(SetupKey::new(SETUP_KEY, 5, env.now() - chrono::Duration::hours(1)));
    store.save_account(account).await.unwrap();
    let manager = manager(&store, &env);

    let result = manager.register_peer(SETUP_KEY, request('a', "a")).await;
    assert!(matches!(result, Err(CoreError::FailedPrecondition(_))));
}

#[tokio::test]
async fn revoked_setup_key_is_a_failed_precondition() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    let mut key = SetupKey::new(SETUP_KEY, 5, env.now() + chrono::Duration::hours(1));
    key.revoked = true;
    let account = Account::new(AccountId::new(ACCOUNT), "10.0.0.0/24".parse().unwrap())
        .with_setup_key(key);
    store.save_account(account).await.unwrap();
    let manager = manager(&store, &env);

    let result = manager.register_peer(SETUP_KEY, request('a', "a")).await;
    assert!(matches!(result, Err(CoreError::FailedPrecondition(_))));
}

#[tokio::test]
async fn public_keys_are_unique_across_accounts() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    provision(&store, &env, 5).await;

    let other_key = "11111111-2222-4333-8444-555555555555";
    let other = Account::new(AccountId::new("acc-other"), "10.1.0.0/24".parse().unwrap())
        .with_setup_key(SetupKey::new(other_key, 5, env.now() + chrono::Duration::hours(24)));
    store.save_account(other).await.unwrap();

    let manager = manager(&store, &env);
    manager.register_peer(SETUP_KEY, request('a', "a")).await.unwrap();

    // Same public key against the other tenant's setup key.
    let result = manager.register_peer(other_key, request('a', "imposter")).await;
    assert!(matches!(result, Err(CoreError::AlreadyExists(_))));
}

#[tokio::test]
async fn re_registering_the_same_key_already_exists() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    provision(&store, &env, 5).await;
    let manager = manager(&store, &env);

    manager.register_peer(SETUP_KEY, request('a', "a")).await.unwrap();
    let result = manager.register_peer(SETUP_KEY, request('a', "again")).await;
    assert!(matches!(result, Err(CoreError::AlreadyExists(_))));
}

#[tokio::test]
async fn empty_setup_key_requires_the_legacy_flag() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    let manager = manager(&store, &env);

    let result = manager.register_peer("", request('a', "a")).await;
    assert!(matches!(result, Err(CoreError::FailedPrecondition(_))));
    assert_eq!(store.account_count(), 0);
}

#[tokio::test]
async fn empty_setup_key_creates_an_account_when_allowed() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    let config = ManagerConfig { allow_implicit_account: true, ..ManagerConfig::default() };
    let manager = AccountManager::new(store.clone(), env.clone(), config);

    let peer = manager.register_peer("", request('a', "a")).await.unwrap();

    assert_eq!(store.account_count(), 1);
    let account = store.get_peer_account(&peer.key).await.unwrap();
    assert!(account.network.net.contains(&peer.ip));
    assert_eq!(account.setup_keys.len(), 1);
    assert_eq!(account.setup_keys.values().next().unwrap().usage_count, 1);
}

#[tokio::test]
async fn every_assigned_address_resolves_back_to_its_peer() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    let account_id = provision(&store, &env, 30).await;
    let manager = manager(&store, &env);

    let tags: Vec<char> = ('a'..='t').collect();
    for c in &tags {
        manager.register_peer(SETUP_KEY, request(*c, "host")).await.unwrap();
    }

    let account = store.get_account(&account_id).await.unwrap();
    assert_eq!(account.peers.len(), tags.len());

    // All addresses distinct and inside the account network.
    let mut seen = std::collections::HashSet::new();
    for peer in account.peers.values() {
        assert!(account.network.net.contains(&peer.ip));
        assert!(seen.insert(peer.ip), "duplicate address {}", peer.ip);

        let found = manager.get_peer_by_ip(&account_id, peer.ip).await.unwrap();
        assert_eq!(found.key, peer.key);
    }
}

#[tokio::test]
async fn rename_round_trips_through_the_catalog() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    let account_id = provision(&store, &env, 5).await;
    let manager = manager(&store, &env);

    manager.register_peer(SETUP_KEY, request('a', "old-name")).await.unwrap();
    let renamed = manager.rename_peer(&account_id, &peer_key('a'), "new-name").await.unwrap();
    assert_eq!(renamed.name, "new-name");

    let fetched = manager.get_peer(&peer_key('a')).await.unwrap();
    assert_eq!(fetched.name, "new-name");
}

#[tokio::test]
async fn list_peers_excludes_the_requester_and_rejects_strangers() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    provision(&store, &env, 5).await;
    let manager = manager(&store, &env);

    manager.register_peer(SETUP_KEY, request('a', "a")).await.unwrap();
    manager.register_peer(SETUP_KEY, request('b', "b")).await.unwrap();
    manager.register_peer(SETUP_KEY, request('c', "c")).await.unwrap();

    let others = manager.list_peers_except(&peer_key('a')).await.unwrap();
    let keys: std::collections::HashSet<_> = others.iter().map(|p| p.key.clone()).collect();
    assert_eq!(keys, [peer_key('b'), peer_key('c')].into_iter().collect());

    let stranger = manager.list_peers_except(&peer_key('z')).await;
    assert!(matches!(stranger, Err(CoreError::Internal(_))));
}

#[tokio::test(start_paused = true)]
async fn connection_marks_touch_last_seen_either_way() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    provision(&store, &env, 5).await;
    let manager = manager(&store, &env);

    let registered = manager.register_peer(SETUP_KEY, request('a', "a")).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    manager.mark_peer_connected(&peer_key('a'), true).await.unwrap();
    let connected = manager.get_peer(&peer_key('a')).await.unwrap();
    assert!(connected.status.connected);
    assert!(connected.status.last_seen > registered.status.last_seen);

    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    manager.mark_peer_connected(&peer_key('a'), false).await.unwrap();
    let disconnected = manager.get_peer(&peer_key('a')).await.unwrap();
    assert!(!disconnected.status.connected);
    assert!(disconnected.status.last_seen > connected.status.last_seen);
}

#[tokio::test]
async fn address_pool_exhaustion_is_reported() {
    let store = MemoryStore::new();
    let env = SimEnv::new();
    let account = Account::new(AccountId::new(ACCOUNT), "10.9.0.0/30".parse().unwrap())
        .with_setup_key(SetupKey::new(SETUP_KEY, 50, env.now() + chrono::Duration::hours(24)));
    store.save_account(account).await.unwrap();
    let manager = manager(&store, &env);

    // A /30 has two host addresses.
    manager.register_peer(SETUP_KEY, request('a', "a")).await.unwrap();
    manager.register_peer(SETUP_KEY, request('b', "b")).await.unwrap();

    let third = manager.register_peer(SETUP_KEY, request('c', "c")).await;
    assert!(matches!(third, Err(CoreError::Exhausted(_))));
}
