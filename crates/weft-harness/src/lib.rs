//! Deterministic simulation harness for the weft control plane.
//!
//! Every seam the core exposes gets a scripted implementation here:
//!
//! - [`SimEnv`]: virtual-friendly clock and seeded RNG
//! - [`SignalHub`]: in-memory signaling relay between simulated agents
//! - [`SimIceConfigurator`] / [`SimIceAgent`]: canned candidate gathering
//!   and pair selection, with an on/off connectivity switch
//! - [`MemoryTunnel`]: records every tunnel programming call for
//!   assertions
//!
//! Integration tests in `tests/` wire full agents (engine + connection
//! state machines) and a coordinator (account manager + memory store)
//! together out of these parts.

#![forbid(unsafe_code)]

mod mem_tunnel;
mod sim_env;
mod sim_ice;
mod sim_signal;

pub use mem_tunnel::{MemoryTunnel, RecordedPeer, TunnelOp};
pub use sim_env::SimEnv;
pub use sim_ice::{SimIceAgent, SimIceConfigurator};
pub use sim_signal::{SignalHub, SignalOutbox};
