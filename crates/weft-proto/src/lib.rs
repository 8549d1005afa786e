//! Wire types for the weft control plane.
//!
//! This crate contains the data that crosses process boundaries and nothing
//! else: signaling envelopes exchanged between agents through the relay, and
//! the management messages exchanged between an agent and the coordinator.
//! It performs no I/O, so both halves of the system and the simulation
//! harness share one set of codecs.
//!
//! # Modules
//!
//! - [`envelope`]: signal envelope, body kinds, ICE credential codec
//! - [`control`]: management requests, responses, and sync updates
//! - [`errors`]: structured codec errors

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod control;
pub mod envelope;
pub mod errors;

pub use control::{
    LoginRequest, LoginResponse, ManagementRequest, ManagementResponse, RegisterRequest,
    RemotePeer, SyncUpdate,
};
pub use envelope::{BodyKind, IceCredentials, SignalBody, SignalEnvelope};
pub use errors::{ProtocolError, Result};
