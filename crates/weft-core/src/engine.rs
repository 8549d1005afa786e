//! The peer engine: reconciles the coordinator's desired peer set into live
//! connections.
//!
//! Two streams feed the engine. The coordinator stream announces which
//! peers this agent should be connected to; the signal stream carries ICE
//! negotiation messages from those peers. One mutex (`sync_msg_mux`)
//! serializes every message from both streams, so a handler observing the
//! connection map never races another handler. A second, finer mutex
//! (`peer_mux`) shields the map itself for the short critical sections in
//! connection start/stop paths. When both are needed the order is always
//! `sync_msg_mux` then `peer_mux`.
//!
//! # Reconciliation
//!
//! Each update carries the full desired set. Connections not in the set
//! are removed and closed; peers without a connection get a spawned
//! initializer that retries `open` under exponential backoff forever. The
//! only way to stop an initializer is to remove its peer from the desired
//! set: it re-checks membership after every attempt and exits quietly once
//! evicted. Removal always wins that race.

use std::{
    collections::{HashMap, HashSet},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc,
    },
    time::Duration,
};

use ipnet::Ipv4Net;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use weft_proto::{BodyKind, IceCredentials, SignalEnvelope, SyncUpdate};

use crate::{
    backoff::{Backoff, BackoffConfig},
    connection::{ConnConfig, ConnState, Connection},
    env::Environment,
    error::CoreError,
    ice::{IceAgentConfig, IceConfigurator},
    peer::PeerId,
    signal::SignalClient,
    tunnel::TunnelAdapter,
};

/// Ceiling on a single connection attempt, from `open` to Connected.
pub const PEER_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Keepalive programmed on every tunnel peer, frequent enough to hold NAT
/// mappings open.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(25);

/// Static engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tunnel interface name
    pub iface: String,
    /// Our tunnel public key
    pub local_key: PeerId,
    /// Our tunnel private key; configured once onto the interface and
    /// never handed to individual connections
    pub private_key: String,
    /// Our address inside the overlay network
    pub local_addr: Ipv4Net,
    /// STUN and TURN servers for candidate gathering
    pub stun_turn_urls: Vec<String>,
    /// Local interfaces to ignore while gathering candidates
    pub iface_blacklist: HashSet<String>,
    /// Keepalive for tunnel peers
    pub keepalive: Duration,
    /// Per-attempt connection deadline
    pub open_timeout: Duration,
}

impl EngineConfig {
    /// Config with conventional timeouts filled in.
    #[must_use]
    pub fn new(
        iface: impl Into<String>,
        local_key: PeerId,
        private_key: impl Into<String>,
        local_addr: Ipv4Net,
    ) -> Self {
        Self {
            iface: iface.into(),
            local_key,
            private_key: private_key.into(),
            local_addr,
            stun_turn_urls: Vec::new(),
            iface_blacklist: HashSet::new(),
            keepalive: DEFAULT_KEEPALIVE,
            open_timeout: PEER_CONNECTION_TIMEOUT,
        }
    }
}

struct EngineInner<E: Environment> {
    config: EngineConfig,
    env: E,
    signal: Arc<dyn SignalClient>,
    tunnel: Arc<dyn TunnelAdapter>,
    ice: Arc<dyn IceConfigurator>,
    /// `peer_mux`: shields the connection map
    conns: Mutex<HashMap<PeerId, Arc<Connection<E>>>>,
    /// Serializes every coordinator and signal stream message
    sync_msg_mux: Mutex<()>,
    /// Tunnel listen port, learned in [`Engine::start`]
    wg_port: AtomicU16,
}

/// Agent-side connection engine. Cheap to clone; clones share state.
pub struct Engine<E: Environment> {
    inner: Arc<EngineInner<E>>,
}

impl<E: Environment> Clone for Engine<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E: Environment> Engine<E> {
    /// Assemble an engine over its seams. No connections are opened here.
    pub fn new(
        config: EngineConfig,
        env: E,
        signal: Arc<dyn SignalClient>,
        tunnel: Arc<dyn TunnelAdapter>,
        ice: Arc<dyn IceConfigurator>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                env,
                signal,
                tunnel,
                ice,
                conns: Mutex::new(HashMap::new()),
                sync_msg_mux: Mutex::new(()),
                wg_port: AtomicU16::new(0),
            }),
        }
    }

    /// Bring up the tunnel interface: create, key it, learn the listen
    /// port. Connections are only established later, driven by coordinator
    /// updates.
    ///
    /// # Errors
    ///
    /// Propagates tunnel adapter failures.
    pub async fn start(&self) -> Result<(), CoreError> {
        let config = &self.inner.config;

        self.inner.tunnel.create(&config.iface, config.local_addr).await?;
        self.inner.tunnel.configure(&config.iface, &config.private_key).await?;
        let port = self.inner.tunnel.get_listen_port(&config.iface).await?;
        self.inner.wg_port.store(port, Ordering::SeqCst);

        info!(iface = %config.iface, port, "tunnel interface ready");
        Ok(())
    }

    /// Apply one coordinator update: the full set of peers this agent
    /// should be connected to.
    ///
    /// An update with no peers is ignored; explicit teardown goes through
    /// [`Engine::stop`].
    ///
    /// # Errors
    ///
    /// - [`CoreError::Invalid`]: malformed peer key or CIDR in the update
    ///   (the whole update is abandoned; the next one re-drives
    ///   reconciliation)
    pub async fn handle_sync_update(&self, update: &SyncUpdate) -> Result<(), CoreError> {
        let _serial = self.inner.sync_msg_mux.lock().await;

        if update.remote_peers.is_empty() {
            return Ok(());
        }

        let mut desired: HashMap<PeerId, Vec<Ipv4Net>> = HashMap::new();
        for remote in &update.remote_peers {
            let key = PeerId::new(remote.peer_key.clone())?;
            let allowed_ips = remote
                .allowed_ips
                .iter()
                .map(|cidr| {
                    cidr.parse::<Ipv4Net>()
                        .map_err(|_| CoreError::Invalid(format!("malformed allowed IP {cidr}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            desired.insert(key, allowed_ips);
        }

        let to_remove: Vec<PeerId> = {
            let conns = self.inner.conns.lock().await;
            conns.keys().filter(|key| !desired.contains_key(*key)).cloned().collect()
        };
        self.remove_peer_connections(&to_remove).await?;

        for (key, allowed_ips) in desired {
            let known = self.inner.conns.lock().await.contains_key(&key);
            if !known {
                debug!(peer = %key, "spawning initializer for new peer");
                let engine = self.clone();
                tokio::spawn(async move { engine.initialize_peer(key, allowed_ips).await });
            }
        }

        Ok(())
    }

    /// Handle one signal message from the relay.
    ///
    /// Malformed bodies are dropped with a warning: the sender may retry,
    /// and a broken payload must not stall the stream. Addressing
    /// violations are errors: a message from an unknown peer or aimed at a
    /// different key means the relay or a peer is misbehaving.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Invalid`]: sender key malformed
    /// - [`CoreError::Internal`]: unknown sender, wrong addressee, or a
    ///   credential/candidate arriving in a state that cannot accept it
    pub async fn handle_signal(&self, envelope: &SignalEnvelope) -> Result<(), CoreError> {
        let _serial = self.inner.sync_msg_mux.lock().await;

        let sender = PeerId::new(envelope.key.clone())?;

        let conn = self
            .inner
            .conns
            .lock()
            .await
            .get(&sender)
            .cloned()
            .ok_or_else(|| {
                CoreError::Internal(format!("wrongly addressed message from {sender}"))
            })?;

        if envelope.remote_key != self.inner.config.local_key.as_str() {
            return Err(CoreError::Internal(format!(
                "message addressed to {} delivered to {}",
                envelope.remote_key, self.inner.config.local_key
            )));
        }

        match envelope.body.kind {
            BodyKind::Offer => match IceCredentials::decode(&envelope.body.payload) {
                Ok(credentials) => conn.on_offer(credentials).await,
                Err(err) => {
                    warn!(peer = %sender, error = %err, "dropping malformed offer");
                    Ok(())
                },
            },
            BodyKind::Answer => match IceCredentials::decode(&envelope.body.payload) {
                Ok(credentials) => conn.on_answer(credentials).await,
                Err(err) => {
                    warn!(peer = %sender, error = %err, "dropping malformed answer");
                    Ok(())
                },
            },
            BodyKind::Candidate => match envelope.candidate_text() {
                Ok(candidate) => conn.on_remote_candidate(candidate).await,
                Err(err) => {
                    warn!(peer = %sender, error = %err, "dropping malformed candidate");
                    Ok(())
                },
            },
        }
    }

    /// Current state of the connection toward `key`, if one exists.
    pub async fn peer_connection_status(&self, key: &PeerId) -> Option<ConnState> {
        let conn = self.inner.conns.lock().await.get(key).cloned();
        match conn {
            Some(conn) => Some(conn.state().await),
            None => None,
        }
    }

    /// Tear down every connection, as if the coordinator announced an
    /// empty peer set. The tunnel interface itself is left to its owner.
    ///
    /// # Errors
    ///
    /// Propagates removal failures.
    pub async fn stop(&self) -> Result<(), CoreError> {
        let _serial = self.inner.sync_msg_mux.lock().await;

        let all: Vec<PeerId> = self.inner.conns.lock().await.keys().cloned().collect();
        self.remove_peer_connections(&all).await
    }

    /// Remove and close the named connections. Holding `peer_mux` for the
    /// whole batch keeps a concurrent initializer from resurrecting an
    /// entry mid-removal.
    async fn remove_peer_connections(&self, keys: &[PeerId]) -> Result<(), CoreError> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut conns = self.inner.conns.lock().await;
        for key in keys {
            if let Some(conn) = conns.remove(key) {
                conn.close().await;
                info!(peer = %key, "removed peer connection");
            }
        }
        Ok(())
    }

    /// Retry loop behind every new peer: attempt, re-check membership,
    /// back off, repeat. Runs until the connection opens or the peer
    /// leaves the desired set.
    async fn initialize_peer(self, key: PeerId, allowed_ips: Vec<Ipv4Net>) {
        let mut backoff = Backoff::new(BackoffConfig::default());

        loop {
            let result = self.open_peer_connection(&key, &allowed_ips).await;

            // Membership check before anything else: if the reconciler
            // evicted this peer while we were connecting, the outcome of
            // the attempt no longer matters.
            if !self.inner.conns.lock().await.contains_key(&key) {
                info!(peer = %key, "abandoning connection attempt, peer left desired set");
                return;
            }

            match result {
                Ok(endpoint) => {
                    debug!(peer = %key, %endpoint, "initializer finished");
                    return;
                },
                Err(err) => {
                    warn!(peer = %key, error = %err, "connection attempt failed, retrying");
                    let delay = backoff.delay(self.inner.env.random_f64());
                    self.inner.env.sleep(delay).await;
                },
            }
        }
    }

    /// Create a connection for `key`, publish it in the map, and drive it
    /// to Connected. Publishing before opening is what lets the signal
    /// handler route the remote side's OFFER to this connection while
    /// `open` is still blocked.
    async fn open_peer_connection(
        &self,
        key: &PeerId,
        allowed_ips: &[Ipv4Net],
    ) -> Result<SocketAddr, CoreError> {
        let config = &self.inner.config;

        let conn = {
            let mut conns = self.inner.conns.lock().await;

            let agent_config = IceAgentConfig {
                urls: config.stun_turn_urls.clone(),
                iface_blacklist: config.iface_blacklist.clone(),
            };
            let agent = self.inner.ice.new_agent(&agent_config);

            let wg_port = self.inner.wg_port.load(Ordering::SeqCst);
            let conn_config = ConnConfig {
                iface: config.iface.clone(),
                local_key: config.local_key.clone(),
                remote_key: key.clone(),
                local_addr: config.local_addr,
                wg_listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), wg_port),
                allowed_ips: allowed_ips.to_vec(),
                keepalive: config.keepalive,
            };

            let conn = Arc::new(Connection::new(
                conn_config,
                agent,
                self.inner.env.clone(),
                Arc::clone(&self.inner.signal),
                Arc::clone(&self.inner.tunnel),
            ));
            conns.insert(key.clone(), Arc::clone(&conn));
            conn
        };

        conn.open(self.inner.config.open_timeout).await
    }
}

impl<E: Environment> std::fmt::Debug for Engine<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("iface", &self.inner.config.iface)
            .field("local_key", &self.inner.config.local_key)
            .finish_non_exhaustive()
    }
}
