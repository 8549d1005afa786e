//! Scripted ICE agents.
//!
//! A simulated agent advertises one host candidate (its configurator's
//! address) and selects a pair as soon as it has been started and has seen
//! at least one remote candidate, provided the configurator is "online".
//! Offline configurators produce agents that gather but never connect,
//! which is how tests exercise timeouts and retry loops.
//!
//! Candidates travel as plain `ip:port` strings; the selected pair's
//! endpoint is parsed straight from the first remote candidate.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use weft_core::{
    error::CoreError,
    ice::{IceAgent, IceAgentConfig, IceConfigurator, IceEvent, IceRole},
};
use weft_proto::IceCredentials;

/// Builds scripted agents for one simulated host.
pub struct SimIceConfigurator {
    advertised: SocketAddr,
    online: Arc<AtomicBool>,
    sequence: AtomicU64,
    agents: Mutex<Vec<SimIceAgent>>,
    closed: Arc<AtomicUsize>,
}

impl SimIceConfigurator {
    /// Host that can connect, advertising `advertised` as its candidate.
    #[must_use]
    pub fn new(advertised: SocketAddr) -> Self {
        Self {
            advertised,
            online: Arc::new(AtomicBool::new(true)),
            sequence: AtomicU64::new(0),
            agents: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Host whose negotiations never complete (candidates flow, no pair is
    /// ever selected).
    #[must_use]
    pub fn offline(advertised: SocketAddr) -> Self {
        let configurator = Self::new(advertised);
        configurator.online.store(false, Ordering::SeqCst);
        configurator
    }

    /// Flip connectivity. Agents created earlier observe the change on
    /// their next opportunity to select.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// How many agents this configurator has built.
    #[must_use]
    pub fn created_agents(&self) -> usize {
        self.agents.lock().expect("SimIceConfigurator mutex poisoned").len()
    }

    /// How many of them have been closed.
    #[must_use]
    pub fn closed_agents(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Handles to every agent built so far, in creation order.
    #[must_use]
    pub fn agents(&self) -> Vec<SimIceAgent> {
        self.agents.lock().expect("SimIceConfigurator mutex poisoned").clone()
    }
}

impl IceConfigurator for SimIceConfigurator {
    fn new_agent(&self, _config: &IceAgentConfig) -> Box<dyn IceAgent> {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        let agent = SimIceAgent {
            inner: Arc::new(AgentInner {
                credentials: IceCredentials {
                    ufrag: format!("uf{n}-{}", self.advertised),
                    pwd: format!("pwd{n}"),
                },
                advertised: self.advertised,
                online: Arc::clone(&self.online),
                closed_total: Arc::clone(&self.closed),
                closed: AtomicBool::new(false),
                state: tokio::sync::Mutex::new(AgentState::default()),
            }),
        };
        self.agents.lock().expect("SimIceConfigurator mutex poisoned").push(agent.clone());
        Box::new(agent)
    }
}

#[derive(Default)]
struct AgentState {
    events: Option<mpsc::Sender<IceEvent>>,
    remote_candidates: Vec<String>,
    selected: bool,
}

struct AgentInner {
    credentials: IceCredentials,
    advertised: SocketAddr,
    online: Arc<AtomicBool>,
    closed_total: Arc<AtomicUsize>,
    closed: AtomicBool,
    state: tokio::sync::Mutex<AgentState>,
}

/// One scripted negotiation session. Clones share state, so tests can keep
/// a handle to an agent the engine owns.
#[derive(Clone)]
pub struct SimIceAgent {
    inner: Arc<AgentInner>,
}

impl SimIceAgent {
    /// Whether this agent has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Push a later pair promotion to whoever is consuming events. Used to
    /// exercise endpoint updates after Connected.
    pub async fn promote(&self, endpoint: SocketAddr) {
        let state = self.inner.state.lock().await;
        if let Some(events) = &state.events {
            let _ = events.send(IceEvent::SelectedPair(endpoint)).await;
        }
    }

    async fn maybe_select(&self, state: &mut AgentState) -> Result<(), CoreError> {
        if state.selected
            || !self.inner.online.load(Ordering::SeqCst)
            || state.remote_candidates.is_empty()
        {
            return Ok(());
        }
        let Some(events) = state.events.clone() else {
            return Ok(());
        };

        let endpoint: SocketAddr = state.remote_candidates[0]
            .parse()
            .map_err(|_| {
                CoreError::Invalid(format!("malformed candidate {}", state.remote_candidates[0]))
            })?;

        state.selected = true;
        let _ = events.send(IceEvent::SelectedPair(endpoint)).await;
        Ok(())
    }
}

#[async_trait]
impl IceAgent for SimIceAgent {
    fn credentials(&self) -> IceCredentials {
        self.inner.credentials.clone()
    }

    async fn start(
        &self,
        _role: IceRole,
        _remote: IceCredentials,
        events: mpsc::Sender<IceEvent>,
    ) -> Result<(), CoreError> {
        if self.is_closed() {
            return Err(CoreError::Invalid("ice agent closed".to_string()));
        }

        let mut state = self.inner.state.lock().await;
        // One host candidate, gathered instantly.
        let _ = events.send(IceEvent::Candidate(self.inner.advertised.to_string())).await;
        state.events = Some(events);
        self.maybe_select(&mut state).await
    }

    async fn add_remote_candidate(&self, candidate: &str) -> Result<(), CoreError> {
        if self.is_closed() {
            return Err(CoreError::Invalid("ice agent closed".to_string()));
        }

        let mut state = self.inner.state.lock().await;
        state.remote_candidates.push(candidate.to_string());
        self.maybe_select(&mut state).await
    }

    async fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.closed_total.fetch_add(1, Ordering::SeqCst);
        }
    }
}
