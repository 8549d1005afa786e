//! Seam to the ICE implementation used for NAT traversal.
//!
//! One agent per connection attempt. The agent owns candidate gathering and
//! connectivity checks; the connection state machine owns what to do with
//! the results. Everything the agent discovers flows through a single event
//! channel, so the state machine consumes gathering and nomination in
//! arrival order without callback plumbing.

use std::{collections::HashSet, net::SocketAddr};

use async_trait::async_trait;
use tokio::sync::mpsc;
use weft_proto::IceCredentials;

use crate::{error::CoreError, peer::PeerId};

/// Which side drives candidate pair nomination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceRole {
    /// This side nominates pairs
    Controlling,
    /// The remote side nominates pairs
    Controlled,
}

/// Deterministic role assignment for a peer pair.
///
/// The side with the lexicographically greater public key controls. Both
/// sides compute this independently from data they already have, so no
/// coordination round is needed and exactly one side controls.
#[must_use]
pub fn negotiated_role(local: &PeerId, remote: &PeerId) -> IceRole {
    if local > remote { IceRole::Controlling } else { IceRole::Controlled }
}

/// Everything the agent reports while negotiating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IceEvent {
    /// A local candidate was gathered; its text form must be signaled to
    /// the remote side
    Candidate(String),
    /// A candidate pair was selected; the address is the remote transport
    /// endpoint to program into the tunnel. May fire again later when a
    /// better pair is promoted.
    SelectedPair(SocketAddr),
    /// Negotiation failed and will not recover
    Failed(String),
}

/// STUN/TURN servers and local interface restrictions for one agent.
#[derive(Debug, Clone, Default)]
pub struct IceAgentConfig {
    /// STUN and TURN server URLs
    pub urls: Vec<String>,
    /// Local interfaces to ignore while gathering candidates
    pub iface_blacklist: HashSet<String>,
}

/// One ICE negotiation session.
#[async_trait]
pub trait IceAgent: Send + Sync {
    /// Local credentials, available from construction. They go out in the
    /// OFFER or ANSWER before checks start.
    fn credentials(&self) -> IceCredentials;

    /// Begin gathering and connectivity checks against the remote
    /// credentials. Progress is reported on `events`.
    async fn start(
        &self,
        role: IceRole,
        remote: IceCredentials,
        events: mpsc::Sender<IceEvent>,
    ) -> Result<(), CoreError>;

    /// Feed one remote candidate (canonical text form) into the checks.
    async fn add_remote_candidate(&self, candidate: &str) -> Result<(), CoreError>;

    /// Release the agent and its sockets. Idempotent.
    async fn close(&self);
}

/// Creates agents; one implementation per deployment (real ICE stack in
/// production, scripted agents in the harness).
pub trait IceConfigurator: Send + Sync + 'static {
    /// Build a fresh agent for one connection attempt.
    fn new_agent(&self, config: &IceAgentConfig) -> Box<dyn IceAgent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(c: char) -> PeerId {
        PeerId::new(format!("{}=", c.to_string().repeat(43))).expect("test key")
    }

    #[test]
    fn exactly_one_side_controls() {
        let a = key('A');
        let b = key('B');

        let a_role = negotiated_role(&a, &b);
        let b_role = negotiated_role(&b, &a);

        assert_ne!(a_role, b_role);
        assert_eq!(b_role, IceRole::Controlling); // 'B' > 'A'
    }

    #[test]
    fn role_is_stable_across_calls() {
        let a = key('C');
        let b = key('D');
        assert_eq!(negotiated_role(&a, &b), negotiated_role(&a, &b));
    }
}
