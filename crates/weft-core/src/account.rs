//! Accounts, setup keys, and the account manager.
//!
//! An account is the administrative boundary: one tenant, one address pool,
//! one set of setup keys, one set of peers. The [`AccountManager`] is the
//! only writer; every public operation takes the manager-wide mutex before
//! touching storage, so no caller ever observes a half-applied mutation.

use std::{
    collections::{HashMap, HashSet},
    net::Ipv4Addr,
};

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    env::Environment,
    error::CoreError,
    ip_pool,
    peer::{Peer, PeerId, PeerStatus, RegistrationRequest},
    storage::Store,
};

/// Opaque, stable account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountId(String);

impl AccountId {
    /// Wrap an identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier's text form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The account's address pool and its allocation watermark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountNetwork {
    /// The CIDR all peer addresses are drawn from
    pub net: Ipv4Net,
    /// Most recently assigned address. Allocation scans strictly past this,
    /// which is what keeps deleted peers' addresses out of circulation.
    pub last_ip: Option<Ipv4Addr>,
}

impl AccountNetwork {
    /// A fresh pool over `net` with nothing assigned yet.
    #[must_use]
    pub fn new(net: Ipv4Net) -> Self {
        Self { net, last_ip: None }
    }
}

/// A usage-capped, expiring credential that admits new peers to an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupKey {
    /// Canonical value: upper-cased UUID text
    pub key: String,
    /// Successful registrations performed with this key
    pub usage_count: u32,
    /// Registrations allowed before the key stops working
    pub usage_limit: u32,
    /// Instant after which the key stops working
    pub expires_at: DateTime<Utc>,
    /// Administrative kill switch
    pub revoked: bool,
}

impl SetupKey {
    /// Create an unused key.
    #[must_use]
    pub fn new(key: impl Into<String>, usage_limit: u32, expires_at: DateTime<Utc>) -> Self {
        Self { key: normalize_setup_key(key.into()), usage_count: 0, usage_limit, expires_at, revoked: false }
    }

    /// Whether a registration may use this key right now.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at && self.usage_count < self.usage_limit
    }

    /// A copy with one more use recorded.
    #[must_use]
    pub fn incremented(&self) -> Self {
        Self { usage_count: self.usage_count + 1, ..self.clone() }
    }
}

/// Canonical form of a setup key: trimmed, upper-cased.
#[must_use]
pub fn normalize_setup_key(raw: impl AsRef<str>) -> String {
    raw.as_ref().trim().to_uppercase()
}

/// One tenant: address pool, setup keys, peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Stable identifier
    pub id: AccountId,
    /// Address pool
    pub network: AccountNetwork,
    /// Registered peers keyed by public key
    pub peers: HashMap<PeerId, Peer>,
    /// Admission credentials keyed by canonical value
    pub setup_keys: HashMap<String, SetupKey>,
}

impl Account {
    /// An empty account over the given network.
    #[must_use]
    pub fn new(id: AccountId, net: Ipv4Net) -> Self {
        Self { id, network: AccountNetwork::new(net), peers: HashMap::new(), setup_keys: HashMap::new() }
    }

    /// Add a setup key, returning the account for chained construction.
    #[must_use]
    pub fn with_setup_key(mut self, key: SetupKey) -> Self {
        self.setup_keys.insert(key.key.clone(), key);
        self
    }
}

/// Tunables for the account manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Whether an empty setup key silently creates a fresh account.
    ///
    /// Holdover from the earliest deployments; new installations should
    /// leave this off and pre-provision accounts instead.
    pub allow_implicit_account: bool,
    /// Network assigned to implicitly created accounts
    pub implicit_network: Ipv4Net,
    /// Usage limit on the setup key minted for implicit accounts
    pub implicit_key_usage_limit: u32,
    /// Lifetime of the setup key minted for implicit accounts
    pub implicit_key_ttl: chrono::Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            allow_implicit_account: false,
            // Carrier-grade NAT space, matching what overlay networks
            // conventionally claim on end hosts.
            implicit_network: Ipv4Net::new(Ipv4Addr::new(100, 64, 0, 0), 10)
                .expect("static prefix is valid"),
            implicit_key_usage_limit: 100,
            implicit_key_ttl: chrono::Duration::days(30),
        }
    }
}

/// Single-writer facade over account storage.
///
/// One mutex wraps every operation end to end. The mutex is never held
/// across a call out of this component, so lock ordering is trivial.
pub struct AccountManager<S, E>
where
    S: Store,
    E: Environment,
{
    pub(crate) store: S,
    pub(crate) env: E,
    config: ManagerConfig,
    pub(crate) mux: Mutex<()>,
}

impl<S, E> AccountManager<S, E>
where
    S: Store,
    E: Environment,
{
    /// Create a manager over the given store.
    pub fn new(store: S, env: E, config: ManagerConfig) -> Self {
        Self { store, env, config, mux: Mutex::new(()) }
    }

    /// Register a new peer against the account owning `setup_key`.
    ///
    /// The key is normalized (trimmed, upper-cased) before lookup. A valid
    /// key admits the peer: an address is allocated past the account's
    /// watermark, the key's usage count is bumped, and the whole account is
    /// persisted in one write. An empty key creates a fresh account only
    /// when [`ManagerConfig::allow_implicit_account`] is set.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`]: no account owns the key, or the key record
    ///   is missing from its account
    /// - [`CoreError::FailedPrecondition`]: key expired, revoked, or at its
    ///   usage limit; or empty key with implicit accounts disabled
    /// - [`CoreError::AlreadyExists`]: the public key is registered already,
    ///   in this account or any other
    /// - [`CoreError::Exhausted`]: no address left in the account network
    /// - [`CoreError::Internal`]: storage failure
    pub async fn register_peer(
        &self,
        setup_key: &str,
        request: RegistrationRequest,
    ) -> Result<Peer, CoreError> {
        let _serial = self.mux.lock().await;

        let upper_key = normalize_setup_key(setup_key);
        let now = self.env.now();

        let (mut account, key_record) = if upper_key.is_empty() {
            if !self.config.allow_implicit_account {
                return Err(CoreError::FailedPrecondition(
                    "registration requires a setup key".to_string(),
                ));
            }
            let account = self.new_implicit_account(now);
            debug!(account = %account.id, "created implicit account for empty setup key");
            let key_record = account
                .setup_keys
                .values()
                .next()
                .cloned()
                .ok_or_else(|| CoreError::Internal("implicit account has no setup key".to_string()))?;
            (account, key_record)
        } else {
            let account = self
                .store
                .get_account_by_setup_key(&upper_key)
                .await
                .map_err(|_| CoreError::NotFound(format!("unknown setup key {upper_key}")))?;
            let key_record = account
                .setup_keys
                .get(&upper_key)
                .cloned()
                .ok_or_else(|| CoreError::NotFound(format!("unknown setup key {upper_key}")))?;
            (account, key_record)
        };

        if !key_record.is_valid(now) {
            return Err(CoreError::FailedPrecondition(format!(
                "setup key {} is expired, revoked, or over its usage limit",
                key_record.key
            )));
        }

        // Public keys are identities; one key living in two accounts would
        // let a peer impersonate across tenants.
        if self.store.account_for_peer_key(&request.key).await?.is_some() {
            return Err(CoreError::AlreadyExists(format!(
                "peer {} is already registered",
                request.key
            )));
        }

        let taken: HashSet<Ipv4Addr> = account.peers.values().map(|peer| peer.ip).collect();
        let ip = ip_pool::allocate_after(account.network.net, account.network.last_ip, &taken)?;

        let peer = Peer {
            key: request.key.clone(),
            setup_key: key_record.key.clone(),
            ip,
            name: request.name,
            meta: request.meta,
            status: PeerStatus { last_seen: now, connected: false },
        };

        account.peers.insert(peer.key.clone(), peer.clone());
        account.setup_keys.insert(key_record.key.clone(), key_record.incremented());
        account.network.last_ip = Some(ip);

        self.store
            .save_account(account.clone())
            .await
            .map_err(|_| CoreError::Internal("failed adding peer".to_string()))?;

        info!(peer = %peer.key, account = %account.id, ip = %peer.ip, "registered peer");

        Ok(peer)
    }

    fn new_implicit_account(&self, now: DateTime<Utc>) -> Account {
        let id = AccountId::new(self.env.random_uuid().to_string());
        let key_value = normalize_setup_key(self.env.random_uuid().to_string());
        let key = SetupKey::new(
            key_value,
            self.config.implicit_key_usage_limit,
            now + self.config.implicit_key_ttl,
        );
        Account::new(id, self.config.implicit_network).with_setup_key(key)
    }
}
