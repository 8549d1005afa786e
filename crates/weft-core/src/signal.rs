//! Outbound seam to the signaling relay.
//!
//! The relay itself is an external collaborator: an ordered, reliable
//! message channel keyed by peer public key. The engine only needs to push
//! envelopes into it; inbound messages are delivered by the transport layer
//! calling [`crate::engine::Engine::handle_signal`] directly.

use async_trait::async_trait;
use weft_proto::SignalEnvelope;

use crate::error::CoreError;

/// Sends signal envelopes toward a remote peer via the relay.
#[async_trait]
pub trait SignalClient: Send + Sync + 'static {
    /// Deliver one envelope. The relay guarantees per-pair ordering; the
    /// caller only learns about local submission failures.
    async fn send(&self, envelope: SignalEnvelope) -> Result<(), CoreError>;
}
