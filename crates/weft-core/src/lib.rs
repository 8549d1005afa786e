//! Control-plane core for the weft mesh overlay.
//!
//! Two halves share this crate. The coordinator half owns tenancy: accounts,
//! setup keys, peer registration, and address allocation. The agent half owns
//! connectivity: a reconciliation engine that turns the coordinator's desired
//! peer set into live, signaled, NAT-traversing tunnel sessions.
//!
//! ```text
//!  Agent                                 Coordinator
//!  ┌───────────────────┐   register     ┌───────────────────────┐
//!  │ engine            │───────────────▶│ account (manager)     │
//!  │  ├─ connection SM │   sync stream  │  ├─ storage (Store)   │
//!  │  ├─ ice seam      │◀───────────────│  └─ ip_pool           │
//!  │  └─ tunnel seam   │                └───────────────────────┘
//!  └───────────────────┘   signal relay (envelopes, opaque)
//!            ▲─────────────────────────────▶ other agents
//! ```
//!
//! Every side effect goes through a seam: time and randomness through
//! [`env::Environment`], persistence through [`storage::Store`], the kernel
//! tunnel device through [`tunnel::TunnelAdapter`], NAT traversal through
//! [`ice::IceAgent`], and the relay through [`signal::SignalClient`]. The
//! harness crate swaps all of them for deterministic simulations.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod account;
pub mod backoff;
pub mod connection;
pub mod engine;
pub mod env;
pub mod error;
pub mod ice;
pub mod ip_pool;
pub mod mgmt;
pub mod peer;
pub mod signal;
pub mod storage;
pub mod tunnel;

pub use account::{Account, AccountId, AccountManager, AccountNetwork, ManagerConfig, SetupKey};
pub use connection::{ConnConfig, ConnState, Connection};
pub use engine::{Engine, EngineConfig, PEER_CONNECTION_TIMEOUT};
pub use env::{Environment, SystemEnv};
pub use error::CoreError;
pub use peer::{Peer, PeerId, PeerStatus, PeerSystemMeta, RegistrationRequest};
