//! Per-peer connection state machine.
//!
//! One instance per remote peer, owning one ICE agent and the right to
//! program that peer's entry on the tunnel interface.
//!
//! # State Machine
//!
//! ```text
//!                  open() as controlling
//!        ┌──────┐ ────────────────────▶ ┌──────────┐
//!        │ Idle │                       │ Offering │
//!        └──────┘ ◀─┐                   └──────────┘
//!            │      │ (controlled side       │ remote ANSWER
//!            │      │  stays Idle until      ▼
//!            │      │  the OFFER arrives) ┌─────────────┐
//!            │ remote OFFER              │ Negotiating │◀─┐ candidates
//!            ▼                            └─────────────┘──┘ flow
//!        ┌───────────┐   sends ANSWER          │ selected pair
//!        │ Answering │ ───────────────▶────────▼
//!        └───────────┘                  ┌───────────┐
//!                                       │ Connected │──┐ endpoint
//!             any state, Close/timeout  └───────────┘◀─┘ promotions
//!                        │
//!                        ▼
//!                   ┌────────┐
//!                   │ Closed │
//!                   └────────┘
//! ```
//!
//! The side whose public key compares lexicographically greater acts as the
//! ICE controlling side; the other waits for its offer. Both sides converge
//! in Negotiating, trickle candidates through the signal relay, and on the
//! first selected pair program the tunnel and report Connected.
//!
//! `open` owns the event loop until Connected, then hands the remaining
//! event stream to a background task that applies endpoint promotions.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use ipnet::Ipv4Net;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use weft_proto::{IceCredentials, SignalEnvelope};

use crate::{
    env::Environment,
    error::CoreError,
    ice::{negotiated_role, IceAgent, IceEvent, IceRole},
    peer::PeerId,
    signal::SignalClient,
    tunnel::TunnelAdapter,
};

/// Where a connection currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Created, no negotiation yet
    Idle,
    /// Offer sent, waiting for the answer
    Offering,
    /// Offer received, answer on its way out
    Answering,
    /// Credentials exchanged, candidates flowing, no pair selected yet
    Negotiating,
    /// Pair selected, tunnel programmed
    Connected,
    /// Torn down; the instance is spent
    Closed,
}

/// Static configuration of one connection.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Tunnel interface this connection programs
    pub iface: String,
    /// Our public key
    pub local_key: PeerId,
    /// The remote peer's public key
    pub remote_key: PeerId,
    /// Our address inside the overlay network
    pub local_addr: Ipv4Net,
    /// Local tunnel UDP socket, where decrypted traffic is handed off
    pub wg_listen_addr: SocketAddr,
    /// CIDRs the remote peer owns over the tunnel
    pub allowed_ips: Vec<Ipv4Net>,
    /// Keepalive interval programmed on the tunnel peer
    pub keepalive: Duration,
}

/// Capacity of the ICE event channel. Gathering produces at most a handful
/// of candidates per interface; 64 absorbs any realistic burst without
/// backpressure on the agent.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A live connection attempt toward one remote peer.
pub struct Connection<E: Environment> {
    config: ConnConfig,
    env: E,
    signal: Arc<dyn SignalClient>,
    tunnel: Arc<dyn TunnelAdapter>,
    ice: Box<dyn IceAgent>,
    state: Mutex<ConnState>,
    events_tx: mpsc::Sender<IceEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<IceEvent>>>,
}

impl<E: Environment> Connection<E> {
    /// Wire up a connection around a freshly built ICE agent.
    pub fn new(
        config: ConnConfig,
        ice: Box<dyn IceAgent>,
        env: E,
        signal: Arc<dyn SignalClient>,
        tunnel: Arc<dyn TunnelAdapter>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            env,
            signal,
            tunnel,
            ice,
            state: Mutex::new(ConnState::Idle),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Current state.
    pub async fn state(&self) -> ConnState {
        *self.state.lock().await
    }

    /// The remote peer this connection belongs to.
    #[must_use]
    pub fn remote_key(&self) -> &PeerId {
        &self.config.remote_key
    }

    /// Drive this connection until the tunnel is programmed or `timeout`
    /// elapses.
    ///
    /// The controlling side opens with an OFFER; the controlled side waits
    /// for one. Returns the selected remote endpoint on success. On
    /// timeout the ICE agent is released and the state machine lands in
    /// Closed, but any tunnel peer entry already programmed is left alone:
    /// the caller decides whether to reuse or tear down.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Timeout`]: no selected pair within `timeout`
    /// - [`CoreError::Invalid`]: called twice, or the connection was closed
    ///   underneath us
    /// - [`CoreError::Internal`]: the ICE agent failed outright
    pub async fn open(self: Arc<Self>, timeout: Duration) -> Result<SocketAddr, CoreError> {
        let mut events = self
            .events_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| CoreError::Invalid("connection already opened".to_string()))?;

        let role = negotiated_role(&self.config.local_key, &self.config.remote_key);
        {
            let mut state = self.state.lock().await;
            match *state {
                ConnState::Idle => {
                    if role == IceRole::Controlling {
                        *state = ConnState::Offering;
                    }
                },
                other => {
                    return Err(CoreError::Invalid(format!(
                        "cannot open connection in state {other:?}"
                    )));
                },
            }
        }

        debug!(
            remote = %self.config.remote_key,
            ?role,
            listen = %self.config.wg_listen_addr,
            "opening peer connection"
        );

        if role == IceRole::Controlling {
            let offer = SignalEnvelope::offer(
                self.config.local_key.as_str(),
                self.config.remote_key.as_str(),
                &self.ice.credentials(),
            );
            if let Err(err) = self.signal.send(offer).await {
                self.close().await;
                return Err(err);
            }
        }

        let deadline = self.env.sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = &mut deadline => {
                    self.close().await;
                    return Err(CoreError::Timeout { elapsed: timeout });
                }
                event = events.recv() => {
                    match event {
                        Some(IceEvent::Candidate(candidate)) => {
                            self.signal_candidate(&candidate).await;
                        },
                        Some(IceEvent::SelectedPair(endpoint)) => {
                            if let Err(err) = self.establish(endpoint).await {
                                self.close().await;
                                return Err(err);
                            }
                            let conn = Arc::clone(&self);
                            tokio::spawn(async move { conn.pump_remaining_events(events).await });
                            return Ok(endpoint);
                        },
                        Some(IceEvent::Failed(reason)) => {
                            if self.state().await == ConnState::Closed {
                                return Err(CoreError::Invalid(
                                    "connection closed".to_string(),
                                ));
                            }
                            self.close().await;
                            return Err(CoreError::Internal(format!(
                                "ice negotiation failed: {reason}"
                            )));
                        },
                        // All senders live in self; recv() cannot yield None
                        // before close() fires a Failed event.
                        None => {
                            return Err(CoreError::Internal(
                                "ice event channel closed".to_string(),
                            ));
                        },
                    }
                }
            }
        }
    }

    /// Remote OFFER arrived: answer with our credentials and start checks.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Invalid`] if the connection is closed,
    /// [`CoreError::Internal`] for an offer in any state but Idle.
    pub async fn on_offer(&self, remote: IceCredentials) -> Result<(), CoreError> {
        {
            let mut state = self.state.lock().await;
            match *state {
                ConnState::Idle => *state = ConnState::Answering,
                ConnState::Closed => {
                    return Err(CoreError::Invalid("connection closed".to_string()));
                },
                other => {
                    return Err(CoreError::Internal(format!("unexpected offer in state {other:?}")));
                },
            }
        }

        let answer = SignalEnvelope::answer(
            self.config.local_key.as_str(),
            self.config.remote_key.as_str(),
            &self.ice.credentials(),
        );
        self.signal.send(answer).await?;

        {
            let mut state = self.state.lock().await;
            // A concurrent close while the answer was in flight wins.
            if *state != ConnState::Answering {
                return Err(CoreError::Invalid("connection closed".to_string()));
            }
            *state = ConnState::Negotiating;
        }
        self.ice.start(IceRole::Controlled, remote, self.events_tx.clone()).await
    }

    /// Remote ANSWER arrived: start checks as the controlling side.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Invalid`] if the connection is closed,
    /// [`CoreError::Internal`] for an answer in any state but Offering.
    pub async fn on_answer(&self, remote: IceCredentials) -> Result<(), CoreError> {
        {
            let mut state = self.state.lock().await;
            match *state {
                ConnState::Offering => *state = ConnState::Negotiating,
                ConnState::Closed => {
                    return Err(CoreError::Invalid("connection closed".to_string()));
                },
                other => {
                    return Err(CoreError::Internal(format!(
                        "unexpected answer in state {other:?}"
                    )));
                },
            }
        }

        self.ice.start(IceRole::Controlling, remote, self.events_tx.clone()).await
    }

    /// Remote CANDIDATE arrived: feed it into the checks.
    ///
    /// A candidate for a closed connection is stale signaling in flight,
    /// not an error; it is dropped with a debug log.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Internal`] for a candidate before any
    /// credentials were exchanged.
    pub async fn on_remote_candidate(&self, candidate: &str) -> Result<(), CoreError> {
        match self.state().await {
            ConnState::Closed => {
                debug!(
                    remote = %self.config.remote_key,
                    candidate,
                    "dropping candidate for closed connection"
                );
                Ok(())
            },
            ConnState::Idle => Err(CoreError::Internal(
                "candidate before credential exchange".to_string(),
            )),
            _ => self.ice.add_remote_candidate(candidate).await,
        }
    }

    /// Tear down: release the ICE agent and park the state machine.
    ///
    /// The tunnel peer entry is deliberately left untouched. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().await;
            if *state == ConnState::Closed {
                return;
            }
            *state = ConnState::Closed;
        }

        self.ice.close().await;
        // Wake anyone blocked in open(); if the channel is full the event
        // loop is live and will observe Closed on its own.
        let _ = self.events_tx.try_send(IceEvent::Failed("connection closed".to_string()));

        debug!(remote = %self.config.remote_key, "closed peer connection");
    }

    /// First selected pair: program the tunnel peer and go Connected.
    async fn establish(&self, endpoint: SocketAddr) -> Result<(), CoreError> {
        self.tunnel
            .upsert_peer(
                &self.config.iface,
                &self.config.remote_key,
                &self.config.allowed_ips,
                self.config.keepalive,
                Some(endpoint),
            )
            .await?;

        *self.state.lock().await = ConnState::Connected;

        debug!(
            remote = %self.config.remote_key,
            %endpoint,
            local_addr = %self.config.local_addr,
            "peer connection established"
        );

        Ok(())
    }

    /// Signal one gathered candidate; failures are logged and swallowed,
    /// the remaining candidates may still complete the connection.
    async fn signal_candidate(&self, candidate: &str) {
        let envelope = SignalEnvelope::candidate(
            self.config.local_key.as_str(),
            self.config.remote_key.as_str(),
            candidate,
        );
        if let Err(err) = self.signal.send(envelope).await {
            warn!(
                remote = %self.config.remote_key,
                error = %err,
                "failed signaling candidate"
            );
        }
    }

    /// After Connected: keep applying endpoint promotions until the
    /// connection closes.
    async fn pump_remaining_events(&self, mut events: mpsc::Receiver<IceEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                IceEvent::SelectedPair(endpoint) => {
                    if self.state().await != ConnState::Connected {
                        break;
                    }
                    match self
                        .tunnel
                        .set_peer_endpoint(&self.config.iface, &self.config.remote_key, endpoint)
                        .await
                    {
                        Ok(()) => {
                            debug!(
                                remote = %self.config.remote_key,
                                %endpoint,
                                "applied endpoint promotion"
                            );
                        },
                        Err(err) => {
                            warn!(
                                remote = %self.config.remote_key,
                                error = %err,
                                "failed applying endpoint promotion"
                            );
                        },
                    }
                },
                IceEvent::Candidate(candidate) => {
                    // Late trickle; the remote side may still be waiting on it.
                    self.signal_candidate(&candidate).await;
                },
                IceEvent::Failed(reason) => {
                    debug!(
                        remote = %self.config.remote_key,
                        reason,
                        "event stream ended"
                    );
                    break;
                },
            }
        }
    }
}

impl<E: Environment> std::fmt::Debug for Connection<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote_key", &self.config.remote_key)
            .field("iface", &self.config.iface)
            .finish_non_exhaustive()
    }
}
